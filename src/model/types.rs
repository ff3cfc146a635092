//! Typed views of the cached resources.
//!
//! Every type keeps fields it does not know about in `extra`, so decoding a
//! cached value and encoding it back after an edit loses nothing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::Resource;

/// Server-assigned id; some resources use numbers, some strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(i64),
  Str(String),
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(id) => write!(f, "{}", id),
      EntityId::Str(id) => f.write_str(id),
    }
  }
}

impl From<i64> for EntityId {
  fn from(id: i64) -> Self {
    EntityId::Int(id)
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    EntityId::Str(id.to_string())
  }
}

/// Top-level workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
  pub id: EntityId,
  #[serde(default)]
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A collection of labels within a space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
  pub id: EntityId,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub pinned: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rank: Option<String>,
  #[serde(default)]
  pub labels: Vec<Label>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
  pub id: EntityId,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rank: Option<String>,
  #[serde(default)]
  pub tasks: Vec<Task>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: EntityId,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub done: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rank: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Task {
  pub fn new(id: impl Into<EntityId>, title: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      title: title.into(),
      done: false,
      rank: None,
      extra: Map::new(),
    }
  }
}

impl Resource for Vec<Space> {
  fn resource_path() -> &'static str {
    "spaces"
  }
}

impl Resource for Collection {
  fn resource_path() -> &'static str {
    "space/collections"
  }
}

impl Resource for Vec<Label> {
  fn resource_path() -> &'static str {
    "space/labels"
  }
}

impl Resource for Vec<Task> {
  fn resource_path() -> &'static str {
    "space/tasks"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_entity_id_accepts_numbers_and_strings() {
    let ids: Vec<EntityId> = serde_json::from_value(json!([1, "c1"])).unwrap();
    assert_eq!(ids, vec![EntityId::Int(1), EntityId::Str("c1".into())]);
    assert_eq!(ids[0].to_string(), "1");
    assert_eq!(ids[1].to_string(), "c1");
  }

  #[test]
  fn test_unknown_fields_survive_round_trip() {
    let raw = json!({
      "id": "c1",
      "name": "Home",
      "pinned": false,
      "color": "teal",
      "labels": [{"id": 1, "name": "Work", "tasks": [{"id": "t1", "title": "Call", "due": "2026-01-01"}]}]
    });

    let collection: Collection = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(collection.extra["color"], json!("teal"));
    assert_eq!(collection.labels[0].tasks[0].extra["due"], json!("2026-01-01"));

    let back = serde_json::to_value(&collection).unwrap();
    assert_eq!(back["color"], json!("teal"));
    assert_eq!(back["labels"][0]["tasks"][0]["due"], json!("2026-01-01"));
    assert!(back.get("rank").is_none());
  }

  #[test]
  fn test_resource_paths() {
    assert_eq!(<Vec<Space>>::resource_path(), "spaces");
    assert_eq!(Collection::resource_path(), "space/collections");
    assert_eq!(<Vec<Label>>::resource_path(), "space/labels");
    assert_eq!(<Vec<Task>>::resource_path(), "space/tasks");
  }
}
