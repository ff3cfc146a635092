//! Pure transforms for common optimistic edits.
//!
//! Each takes the decoded current value and returns the edited one, ready to
//! be handed to `CacheLayer::mutate_as`. Reordering always rewrites the rank
//! of the moved item only.

use thiserror::Error;

use super::rank::{self, RankError};
use super::types::{Collection, EntityId, Label, Task};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
  #[error(transparent)]
  Rank(#[from] RankError),

  #[error("no item with id {0}")]
  NotFound(EntityId),
}

/// Items ordered by a fractional rank.
pub trait Ranked {
  fn id(&self) -> &EntityId;
  fn rank(&self) -> Option<&str>;
  fn set_rank(&mut self, rank: String);
  fn clear_rank(&mut self);
}

impl Ranked for Task {
  fn id(&self) -> &EntityId {
    &self.id
  }

  fn rank(&self) -> Option<&str> {
    self.rank.as_deref()
  }

  fn set_rank(&mut self, rank: String) {
    self.rank = Some(rank);
  }

  fn clear_rank(&mut self) {
    self.rank = None;
  }
}

impl Ranked for Label {
  fn id(&self) -> &EntityId {
    &self.id
  }

  fn rank(&self) -> Option<&str> {
    self.rank.as_deref()
  }

  fn set_rank(&mut self, rank: String) {
    self.rank = Some(rank);
  }

  fn clear_rank(&mut self) {
    self.rank = None;
  }
}

/// Sort by rank; unranked items go last, keeping their relative order.
pub fn sort_by_rank<T: Ranked>(items: &mut [T]) {
  items.sort_by(|a, b| match (a.rank(), b.rank()) {
    (Some(a), Some(b)) => a.cmp(b),
    (Some(_), None) => std::cmp::Ordering::Less,
    (None, Some(_)) => std::cmp::Ordering::Greater,
    (None, None) => std::cmp::Ordering::Equal,
  });
}

/// Give unranked (or invalidly ranked) items ranks after the last valid one.
fn ensure_ranks<T: Ranked>(items: &mut [T]) -> Result<(), RankError> {
  for item in items.iter_mut() {
    if item.rank().is_some_and(|r| !rank::is_valid(r)) {
      item.clear_rank();
    }
  }
  sort_by_rank(items);

  let mut last: Option<String> = None;
  for item in items.iter_mut() {
    match item.rank() {
      Some(r) => last = Some(r.to_string()),
      None => {
        let next = rank::between(last.as_deref(), None)?;
        item.set_rank(next.clone());
        last = Some(next);
      }
    }
  }
  Ok(())
}

/// Put `item` right after the item with id `after` (or first when `None`),
/// ranking it between its new neighbours.
pub fn place<T: Ranked>(mut items: Vec<T>, mut item: T, after: Option<&EntityId>) -> Result<Vec<T>, EditError> {
  ensure_ranks(&mut items)?;

  let index = match after {
    None => 0,
    Some(id) => {
      items
        .iter()
        .position(|i| i.id() == id)
        .ok_or_else(|| EditError::NotFound(id.clone()))?
        + 1
    }
  };
  let lower = index.checked_sub(1).and_then(|i| items[i].rank());
  let upper = items.get(index).and_then(|i| i.rank());

  item.set_rank(rank::between(lower, upper)?);
  items.insert(index, item);
  Ok(items)
}

/// Move the item with id `id` right after `after` (first when `None`).
pub fn reorder<T: Ranked>(mut items: Vec<T>, id: &EntityId, after: Option<&EntityId>) -> Result<Vec<T>, EditError> {
  let index = items
    .iter()
    .position(|i| i.id() == id)
    .ok_or_else(|| EditError::NotFound(id.clone()))?;
  let item = items.remove(index);
  place(items, item, after)
}

pub fn set_pinned(collection: Collection, pinned: bool) -> Collection {
  Collection { pinned, ..collection }
}

pub fn toggle_pin(collection: Collection) -> Collection {
  let pinned = !collection.pinned;
  set_pinned(collection, pinned)
}

pub fn rename_label(mut labels: Vec<Label>, id: &EntityId, name: &str) -> Result<Vec<Label>, EditError> {
  let label = labels
    .iter_mut()
    .find(|l| &l.id == id)
    .ok_or_else(|| EditError::NotFound(id.clone()))?;
  label.name = name.to_string();
  Ok(labels)
}

pub fn complete_task(mut tasks: Vec<Task>, id: &EntityId, done: bool) -> Result<Vec<Task>, EditError> {
  let task = tasks
    .iter_mut()
    .find(|t| &t.id == id)
    .ok_or_else(|| EditError::NotFound(id.clone()))?;
  task.done = done;
  Ok(tasks)
}

/// Insert `task` after `after` (first when `None`).
pub fn insert_task(tasks: Vec<Task>, task: Task, after: Option<&EntityId>) -> Result<Vec<Task>, EditError> {
  place(tasks, task, after)
}

/// Remove the task with `id`; removing a missing task is a no-op.
pub fn remove_task(tasks: Vec<Task>, id: &EntityId) -> Vec<Task> {
  tasks.into_iter().filter(|t| &t.id != id).collect()
}

/// Move a task from whichever label holds it into label `to`, placed after
/// `after` there.
pub fn move_task(
  mut collection: Collection,
  task_id: &EntityId,
  to: &EntityId,
  after: Option<&EntityId>,
) -> Result<Collection, EditError> {
  if !collection.labels.iter().any(|l| &l.id == to) {
    return Err(EditError::NotFound(to.clone()));
  }

  let mut moved = None;
  for label in collection.labels.iter_mut() {
    if let Some(index) = label.tasks.iter().position(|t| &t.id == task_id) {
      moved = Some(label.tasks.remove(index));
      break;
    }
  }
  let task = moved.ok_or_else(|| EditError::NotFound(task_id.clone()))?;

  for label in collection.labels.iter_mut() {
    if &label.id == to {
      let tasks = std::mem::take(&mut label.tasks);
      label.tasks = place(tasks, task, after)?;
      break;
    }
  }
  Ok(collection)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn ranked(id: &str, rank: &str) -> Task {
    Task {
      rank: Some(rank.to_string()),
      ..Task::new(id, id)
    }
  }

  fn ids(tasks: &[Task]) -> Vec<String> {
    tasks.iter().map(|t| t.id.to_string()).collect()
  }

  fn collection() -> Collection {
    serde_json::from_value(json!({
      "id": "c1",
      "labels": [
        {"id": 1, "name": "Work", "tasks": [
          {"id": "t1", "title": "Call", "rank": "V"},
          {"id": "t2", "title": "Mail", "rank": "k"}
        ]},
        {"id": 2, "name": "Home", "tasks": [
          {"id": "t3", "title": "Cook", "rank": "V"}
        ]}
      ]
    }))
    .unwrap()
  }

  #[test]
  fn test_insert_between_neighbours() {
    let tasks = vec![ranked("a", "V"), ranked("b", "k")];

    let tasks = insert_task(tasks, Task::new("new", "New"), Some(&"a".into())).unwrap();

    assert_eq!(ids(&tasks), vec!["a", "new", "b"]);
    let rank = tasks[1].rank.as_deref().unwrap();
    assert!("V" < rank && rank < "k");
  }

  #[test]
  fn test_insert_first_and_last() {
    let tasks = vec![ranked("a", "V")];
    let tasks = insert_task(tasks, Task::new("first", "First"), None).unwrap();
    let tasks = insert_task(tasks, Task::new("last", "Last"), Some(&"a".into())).unwrap();

    assert_eq!(ids(&tasks), vec!["first", "a", "last"]);
    let mut sorted = tasks.clone();
    sort_by_rank(&mut sorted);
    assert_eq!(sorted, tasks);
  }

  #[test]
  fn test_reorder_rewrites_only_moved_rank() {
    let tasks = vec![ranked("a", "F"), ranked("b", "V"), ranked("c", "k")];

    let tasks = reorder(tasks, &"c".into(), Some(&"a".into())).unwrap();

    assert_eq!(ids(&tasks), vec!["a", "c", "b"]);
    assert_eq!(tasks[0].rank.as_deref(), Some("F"));
    assert_eq!(tasks[2].rank.as_deref(), Some("V"));
  }

  #[test]
  fn test_unranked_items_get_ranks() {
    let tasks = vec![Task::new("a", "A"), ranked("b", "V"), Task::new("c", "C")];

    let tasks = insert_task(tasks, Task::new("d", "D"), Some(&"b".into())).unwrap();

    assert_eq!(ids(&tasks), vec!["b", "d", "a", "c"]);
    assert!(tasks.iter().all(|t| t.rank.is_some()));
    assert!(tasks.windows(2).all(|w| w[0].rank < w[1].rank));
  }

  #[test]
  fn test_move_task_between_labels() {
    let moved = move_task(collection(), &"t1".into(), &EntityId::Int(2), Some(&"t3".into())).unwrap();

    assert_eq!(ids(&moved.labels[0].tasks), vec!["t2"]);
    assert_eq!(ids(&moved.labels[1].tasks), vec!["t3", "t1"]);
    assert!(moved.labels[1].tasks[1].rank.as_deref().unwrap() > "V");
  }

  #[test]
  fn test_move_to_missing_label_fails() {
    let err = move_task(collection(), &"t1".into(), &EntityId::Int(9), None).unwrap_err();
    assert_eq!(err, EditError::NotFound(EntityId::Int(9)));
  }

  #[test]
  fn test_simple_edits() {
    let c = toggle_pin(collection());
    assert!(c.pinned);
    assert!(!toggle_pin(c).pinned);

    let labels = rename_label(collection().labels, &EntityId::Int(1), "Office").unwrap();
    assert_eq!(labels[0].name, "Office");

    let tasks = complete_task(collection().labels[0].tasks.clone(), &"t2".into(), true).unwrap();
    assert!(tasks[1].done);
    assert!(complete_task(tasks.clone(), &"zz".into(), true).is_err());

    let tasks = remove_task(tasks, &"t1".into());
    assert_eq!(ids(&tasks), vec!["t2"]);
  }
}
