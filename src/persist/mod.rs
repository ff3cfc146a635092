//! Durable storage for the cache.
//!
//! A `PersistenceProvider` serializes a whole store snapshot as one blob and
//! restores it at startup. Two backends ship with the crate:
//! - `KeyValuePersistence`: one blob under a well-known key, saved on hide
//! - `FileSystemPersistence`: one JSON file in a cache directory, saved
//!   through a trailing-edge debounce
//!
//! Persistence is best-effort: failures are logged and never reach readers or
//! mutators.

mod debounce;
mod fs;
mod kv;
mod persister;

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::cache::{CacheEntry, RequestFingerprint, StoreSnapshot};

pub use debounce::Debouncer;
pub use fs::FileSystemPersistence;
pub use kv::{KeyValuePersistence, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore, WELL_KNOWN_KEY};
pub use persister::Persister;

/// Persisted form of the store: a flat list of `(fingerprint, entry)` pairs.
pub type PersistedCache = StoreSnapshot;

/// When a provider wants its `save` to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
  /// Only when the process is hidden or backgrounded
  OnHide,
  /// After every write, coalesced over the given window
  Debounced(Duration),
}

/// Pluggable durable backend for the cache.
pub trait PersistenceProvider: Send + Sync {
  /// Restore the last saved snapshot. Absent data is an empty cache.
  fn load(&self) -> Result<PersistedCache>;

  /// Write `snapshot`, replacing whatever was saved before.
  fn save(&self, snapshot: &PersistedCache) -> Result<()>;

  /// Forget everything saved (sign-out).
  fn clear(&self) -> Result<()>;

  fn trigger(&self) -> SaveTrigger;

  /// Short backend name for logs
  fn name(&self) -> &'static str;
}

/// Encode a snapshot as a JSON array of `[fingerprint, entry]` pairs.
pub fn encode(snapshot: &PersistedCache) -> Result<Vec<u8>> {
  serde_json::to_vec(snapshot).map_err(|e| eyre!("Failed to encode cache snapshot: {}", e))
}

/// Decode a snapshot written by `encode`. Pairs that do not decode are
/// skipped; only a blob that is not a list at all is an error.
pub fn decode(bytes: &[u8]) -> Result<PersistedCache> {
  let pairs: Vec<Value> =
    serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to decode cache snapshot: {}", e))?;

  let mut snapshot = PersistedCache::with_capacity(pairs.len());
  for pair in pairs {
    match serde_json::from_value::<(RequestFingerprint, CacheEntry)>(pair) {
      Ok((key, mut entry)) => {
        entry.key = key.clone();
        snapshot.push((key, entry));
      }
      Err(e) => warn!(error = %e, "skipping unreadable cache entry"),
    }
  }
  Ok(snapshot)
}

/// Stable directory/database name for one environment + API base URL, so
/// caches of different backends never mix.
pub fn namespace(environment: &str, base_url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(base_url.trim_end_matches('/').as_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("{}-{}", environment, &digest[..12])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, RequestFingerprint};
  use chrono::Utc;
  use serde_json::json;

  #[test]
  fn test_encoded_form_is_flat_pair_list() {
    let key = RequestFingerprint::new("space/collections", [("id", "c1")]);
    let entry = CacheEntry::fetched(key.clone(), json!({"id": "c1"}), Utc::now());

    let bytes = encode(&vec![(key, entry)]).unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert!(json.is_array());
    assert_eq!(json[0][0], "space/collections?id=c1");
    assert_eq!(json[0][1]["value"]["id"], "c1");
    assert!(json[0][1].get("isValidating").is_none());
  }

  #[test]
  fn test_decode_restores_keys() {
    let key = RequestFingerprint::new("space/labels", [("collection", "c1")]);
    let entry = CacheEntry::fetched(key.clone(), json!([{"id": 1, "name": "Work"}]), Utc::now());

    let decoded = decode(&encode(&vec![(key.clone(), entry.clone())]).unwrap()).unwrap();

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].0, key);
    assert_eq!(decoded[0].1.key, key);
    assert_eq!(decoded[0].1.value, entry.value);
  }

  #[test]
  fn test_every_key_survives_a_save() {
    let keys = vec![
      RequestFingerprint::path(""),
      RequestFingerprint::path("search?x"),
      RequestFingerprint::path("spaces"),
    ];
    let snapshot: PersistedCache = keys
      .iter()
      .map(|key| (key.clone(), CacheEntry::fetched(key.clone(), json!([]), Utc::now())))
      .collect();

    let decoded = decode(&encode(&snapshot).unwrap()).unwrap();

    let restored: Vec<_> = decoded.into_iter().map(|(key, _)| key).collect();
    assert_eq!(restored, keys);
  }

  #[test]
  fn test_decode_skips_unreadable_pairs() {
    let key = RequestFingerprint::path("spaces");
    let entry = CacheEntry::fetched(key.clone(), json!(["kept"]), Utc::now());
    let mut blob: Value = serde_json::from_slice(&encode(&vec![(key.clone(), entry)]).unwrap()).unwrap();
    blob.as_array_mut().unwrap().push(json!(["space/labels?", "not an entry"]));

    let decoded = decode(&serde_json::to_vec(&blob).unwrap()).unwrap();

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].0, key);
    assert_eq!(decoded[0].1.value(), Some(&json!(["kept"])));
  }

  #[test]
  fn test_decode_rejects_garbage() {
    assert!(decode(b"{\"not\": \"a list\"}").is_err());
  }

  #[test]
  fn test_namespace_separates_environments() {
    let dev = namespace("development", "http://localhost:8000/api");
    let prod = namespace("production", "https://api.example.test");
    assert_ne!(dev, prod);
    assert!(dev.starts_with("development-"));
    assert_eq!(dev, namespace("development", "http://localhost:8000/api/"));
  }
}
