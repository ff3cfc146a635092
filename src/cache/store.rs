//! In-memory cache store with per-key observers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use super::entry::CacheEntry;
use super::fingerprint::RequestFingerprint;

/// Callback run after every write to the store.
pub type WriteHook = Arc<dyn Fn() + Send + Sync>;

/// Every entry the store holds, as persisted: `(fingerprint, entry)` pairs in
/// key order.
pub type StoreSnapshot = Vec<(RequestFingerprint, CacheEntry)>;

/// Mapping from fingerprint to cache entry; the single source of truth for
/// reads.
///
/// Each key owns one `watch` channel whose current value *is* the entry, so
/// there is at most one live value per key and every observer of that key sees
/// it. Writes with no observers simply replace the value.
pub struct CacheStore {
  slots: Mutex<HashMap<RequestFingerprint, watch::Sender<CacheEntry>>>,
  revisions: AtomicU64,
  epoch: AtomicU64,
  write_hook: OnceLock<WriteHook>,
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheStore {
  pub fn new() -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
      revisions: AtomicU64::new(0),
      epoch: AtomicU64::new(0),
      write_hook: OnceLock::new(),
    }
  }

  /// Install the write hook. Only the first call has an effect.
  pub fn set_write_hook(&self, hook: WriteHook) {
    let _ = self.write_hook.set(hook);
  }

  /// Current entry for `key`, if it holds anything.
  pub fn get(&self, key: &RequestFingerprint) -> Option<CacheEntry> {
    let slots = self.slots.lock();
    slots
      .get(key)
      .map(|tx| tx.borrow().clone())
      .filter(|entry| !entry.is_empty())
  }

  /// Replace the entry for `key` wholesale and notify its observers.
  pub fn set(&self, key: &RequestFingerprint, mut entry: CacheEntry) {
    entry.key = key.clone();
    {
      let mut slots = self.slots.lock();
      match slots.get(key) {
        Some(tx) => {
          trace!(%key, observers = tx.receiver_count(), "cache set");
          tx.send_replace(entry);
        }
        None => {
          let (tx, _) = watch::channel(entry);
          slots.insert(key.clone(), tx);
        }
      }
    }
    self.after_write();
  }

  /// Atomically read, transform and write the entry for `key`.
  ///
  /// `f` runs under the store lock and must not call back into the store.
  /// Returns `(previous, written)`.
  pub fn update<F>(&self, key: &RequestFingerprint, f: F) -> (CacheEntry, CacheEntry)
  where
    F: FnOnce(&CacheEntry) -> CacheEntry,
  {
    match self.try_update(key, |current| Ok::<_, std::convert::Infallible>(f(current))) {
      Ok(result) => result,
      Err(never) => match never {},
    }
  }

  /// Like `update`, but `f` may refuse the write by returning an error, in
  /// which case the entry is left untouched.
  pub fn try_update<F, E>(&self, key: &RequestFingerprint, f: F) -> Result<(CacheEntry, CacheEntry), E>
  where
    F: FnOnce(&CacheEntry) -> Result<CacheEntry, E>,
  {
    let result = {
      let mut slots = self.slots.lock();
      let tx = slots
        .entry(key.clone())
        .or_insert_with(|| watch::channel(CacheEntry::empty(key.clone())).0);
      let previous = tx.borrow().clone();
      let mut next = f(&previous)?;
      next.key = key.clone();
      tx.send_replace(next.clone());
      (previous, next)
    };
    self.after_write();
    Ok(result)
  }

  /// Remove the entry for `key`. Live observers see an empty entry.
  pub fn delete(&self, key: &RequestFingerprint) {
    {
      let mut slots = self.slots.lock();
      let observed = slots.get(key).map(|tx| tx.receiver_count() > 0);
      match observed {
        Some(true) => {
          if let Some(tx) = slots.get(key) {
            tx.send_replace(CacheEntry::empty(key.clone()));
          }
        }
        Some(false) => {
          slots.remove(key);
        }
        None => return,
      }
    }
    self.after_write();
  }

  /// Snapshot of every key that currently holds an entry.
  pub fn keys(&self) -> Vec<RequestFingerprint> {
    let slots = self.slots.lock();
    let mut keys: Vec<_> = slots
      .iter()
      .filter(|(_, tx)| !tx.borrow().is_empty())
      .map(|(key, _)| key.clone())
      .collect();
    keys.sort();
    keys
  }

  /// Register an observer for `key`. The receiver starts at the current entry.
  pub fn observe(&self, key: &RequestFingerprint) -> watch::Receiver<CacheEntry> {
    let mut slots = self.slots.lock();
    slots
      .entry(key.clone())
      .or_insert_with(|| watch::channel(CacheEntry::empty(key.clone())).0)
      .subscribe()
  }

  /// Drop the slot for `key` if nobody observes it and it holds nothing.
  pub fn release(&self, key: &RequestFingerprint) {
    let mut slots = self.slots.lock();
    let unused = slots
      .get(key)
      .is_some_and(|tx| tx.receiver_count() == 0 && tx.borrow().is_empty());
    if unused {
      slots.remove(key);
    }
  }

  pub fn observer_count(&self, key: &RequestFingerprint) -> usize {
    let slots = self.slots.lock();
    slots.get(key).map_or(0, |tx| tx.receiver_count())
  }

  /// Keys with at least one live observer.
  pub fn observed_keys(&self) -> Vec<RequestFingerprint> {
    let slots = self.slots.lock();
    slots
      .iter()
      .filter(|(_, tx)| tx.receiver_count() > 0)
      .map(|(key, _)| key.clone())
      .collect()
  }

  /// Copy of every entry worth persisting, taken under one lock.
  pub fn snapshot(&self) -> StoreSnapshot {
    let slots = self.slots.lock();
    let mut entries: StoreSnapshot = slots
      .iter()
      .map(|(key, tx)| (key.clone(), tx.borrow().clone()))
      .filter(|(_, entry)| entry.value.is_some())
      .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
  }

  /// Load persisted entries. Nothing restored is ever marked validating.
  pub fn restore(&self, entries: StoreSnapshot) {
    {
      let mut slots = self.slots.lock();
      for (key, mut entry) in entries {
        entry.key = key.clone();
        entry.is_validating = false;
        entry.revision = 0;
        match slots.get(&key) {
          Some(tx) => {
            tx.send_replace(entry);
          }
          None => {
            slots.insert(key, watch::channel(entry).0);
          }
        }
      }
    }
    self.after_write();
  }

  /// Empty the store (sign-out). Observers see empty entries.
  pub fn clear(&self) {
    {
      let mut slots = self.slots.lock();
      slots.retain(|key, tx| {
        if tx.receiver_count() > 0 {
          tx.send_replace(CacheEntry::empty(key.clone()));
          true
        } else {
          false
        }
      });
      self.epoch.fetch_add(1, Ordering::SeqCst);
    }
    self.after_write();
  }

  /// Number of keys holding an entry.
  pub fn len(&self) -> usize {
    self.keys().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Allocate a revision number for a local mutation write.
  pub fn next_revision(&self) -> u64 {
    self.revisions.fetch_add(1, Ordering::SeqCst) + 1
  }

  /// Incremented by every `clear`; fetches started in an older epoch are
  /// discarded.
  pub fn epoch(&self) -> u64 {
    self.epoch.load(Ordering::SeqCst)
  }

  fn after_write(&self) {
    if let Some(hook) = self.write_hook.get() {
      hook();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use serde_json::json;
  use std::sync::atomic::AtomicUsize;

  fn key(path: &str) -> RequestFingerprint {
    RequestFingerprint::path(path)
  }

  #[test]
  fn test_get_missing_is_none() {
    let store = CacheStore::new();
    assert!(store.get(&key("spaces")).is_none());
  }

  #[test]
  fn test_set_then_get() {
    let store = CacheStore::new();
    let k = key("spaces");
    store.set(&k, CacheEntry::fetched(k.clone(), json!([1, 2]), Utc::now()));

    let entry = store.get(&k).unwrap();
    assert_eq!(entry.value(), Some(&json!([1, 2])));
    assert_eq!(entry.key, k);
  }

  #[tokio::test]
  async fn test_observers_share_one_value() {
    let store = CacheStore::new();
    let k = key("space/labels");
    let mut first = store.observe(&k);
    let second = store.observe(&k);

    store.set(&k, CacheEntry::fetched(k.clone(), json!(["Work"]), Utc::now()));

    first.changed().await.unwrap();
    let a = first.borrow().value.clone().unwrap();
    let b = second.borrow().value.clone().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(store.observer_count(&k), 2);
  }

  #[test]
  fn test_update_returns_previous() {
    let store = CacheStore::new();
    let k = key("spaces");
    store.set(&k, CacheEntry::fetched(k.clone(), json!(1), Utc::now()));

    let (previous, written) = store.update(&k, |current| {
      let mut next = current.clone();
      next.value = Some(Arc::new(json!(2)));
      next
    });

    assert_eq!(previous.value(), Some(&json!(1)));
    assert_eq!(written.value(), Some(&json!(2)));
    assert_eq!(store.get(&k).unwrap().value(), Some(&json!(2)));
  }

  #[test]
  fn test_try_update_error_leaves_entry() {
    let store = CacheStore::new();
    let k = key("spaces");
    store.set(&k, CacheEntry::fetched(k.clone(), json!(1), Utc::now()));

    let result: Result<_, &str> = store.try_update(&k, |_| Err("nope"));
    assert!(result.is_err());
    assert_eq!(store.get(&k).unwrap().value(), Some(&json!(1)));
  }

  #[test]
  fn test_delete_with_observer_empties_entry() {
    let store = CacheStore::new();
    let k = key("spaces");
    let rx = store.observe(&k);
    store.set(&k, CacheEntry::fetched(k.clone(), json!(1), Utc::now()));

    store.delete(&k);

    assert!(store.get(&k).is_none());
    assert!(rx.borrow().is_empty());
    assert!(store.keys().is_empty());
  }

  #[test]
  fn test_keys_is_a_snapshot() {
    let store = CacheStore::new();
    let a = key("a");
    let b = key("b");
    store.set(&a, CacheEntry::fetched(a.clone(), json!(1), Utc::now()));

    let keys = store.keys();
    store.set(&b, CacheEntry::fetched(b.clone(), json!(2), Utc::now()));

    assert_eq!(keys, vec![a]);
    assert_eq!(store.len(), 2);
  }

  #[test]
  fn test_release_drops_unused_slot() {
    let store = CacheStore::new();
    let k = key("spaces");
    let rx = store.observe(&k);
    drop(rx);
    store.release(&k);
    assert_eq!(store.observer_count(&k), 0);
    assert!(store.observed_keys().is_empty());
  }

  #[test]
  fn test_restore_clears_validating_flag() {
    let store = CacheStore::new();
    let k = key("spaces");
    let mut entry = CacheEntry::fetched(k.clone(), json!(1), Utc::now());
    entry.is_validating = true;

    store.restore(vec![(k.clone(), entry)]);

    assert!(!store.get(&k).unwrap().is_validating);
  }

  #[test]
  fn test_clear_bumps_epoch_and_empties() {
    let store = CacheStore::new();
    let k = key("spaces");
    store.set(&k, CacheEntry::fetched(k.clone(), json!(1), Utc::now()));
    let epoch = store.epoch();

    store.clear();

    assert!(store.is_empty());
    assert_eq!(store.epoch(), epoch + 1);
  }

  #[test]
  fn test_write_hook_runs_on_every_write() {
    let store = CacheStore::new();
    let writes = Arc::new(AtomicUsize::new(0));
    let counter = writes.clone();
    store.set_write_hook(Arc::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    }));

    let k = key("spaces");
    store.set(&k, CacheEntry::fetched(k.clone(), json!(1), Utc::now()));
    store.update(&k, |e| e.clone());
    store.delete(&k);

    assert_eq!(writes.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn test_snapshot_skips_valueless_entries() {
    let store = CacheStore::new();
    let a = key("a");
    let b = key("b");
    store.set(&a, CacheEntry::fetched(a.clone(), json!(1), Utc::now()));
    store.update(&b, |e| {
      let mut next = e.clone();
      next.is_validating = true;
      next
    });

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].0, a);
  }
}
