//! Key/value persistence: the whole cache as one blob under one key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::{decode, encode, PersistedCache, PersistenceProvider, SaveTrigger};

/// Key the cache blob is stored under.
pub const WELL_KNOWN_KEY: &str = "spacesync.cache";

/// Minimal string-keyed blob storage, in the manner of browser local storage.
pub trait KeyValueStore: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
  fn set(&self, key: &str, value: &[u8]) -> Result<()>;
  fn remove(&self, key: &str) -> Result<()>;
}

/// Key/value store held in memory; lost with the process.
#[derive(Default)]
pub struct MemoryKeyValueStore {
  items: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyValueStore for MemoryKeyValueStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.items.lock().get(key).cloned())
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    self.items.lock().insert(key.to_string(), value.to_vec());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    self.items.lock().remove(key);
    Ok(())
  }
}

/// SQLite-backed key/value store.
pub struct SqliteKeyValueStore {
  conn: Mutex<Connection>,
}

/// Schema for the key/value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteKeyValueStore {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open key/value store at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory key/value store: {}", e))?;
    Self::with_connection(conn)
  }

  /// Default database path for a cache namespace.
  pub fn default_path(namespace: &str) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("spacesync").join(namespace).join("kv.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run key/value migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl KeyValueStore for SqliteKeyValueStore {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.conn.lock();
    conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| row.get(0))
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))
  }

  fn set(&self, key: &str, value: &[u8]) -> Result<()> {
    let conn = self.conn.lock();
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self.conn.lock();
    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove key {}: {}", key, e))?;
    Ok(())
  }
}

/// Persists the cache as a single blob in a `KeyValueStore`.
///
/// Saved only when the process is hidden or backgrounded, to bound write
/// amplification.
pub struct KeyValuePersistence<S: KeyValueStore> {
  store: S,
  key: String,
}

impl<S: KeyValueStore> KeyValuePersistence<S> {
  pub fn new(store: S) -> Self {
    Self {
      store,
      key: WELL_KNOWN_KEY.to_string(),
    }
  }

  pub fn store(&self) -> &S {
    &self.store
  }
}

impl<S: KeyValueStore> PersistenceProvider for KeyValuePersistence<S> {
  fn load(&self) -> Result<PersistedCache> {
    match self.store.get(&self.key)? {
      Some(bytes) => decode(&bytes),
      None => Ok(Vec::new()),
    }
  }

  fn save(&self, snapshot: &PersistedCache) -> Result<()> {
    self.store.set(&self.key, &encode(snapshot)?)
  }

  fn clear(&self) -> Result<()> {
    self.store.remove(&self.key)
  }

  fn trigger(&self) -> SaveTrigger {
    SaveTrigger::OnHide
  }

  fn name(&self) -> &'static str {
    "keyvalue"
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, CacheStore, RequestFingerprint};
  use chrono::Utc;
  use serde_json::json;

  fn populated_store() -> CacheStore {
    let store = CacheStore::new();
    let spaces = RequestFingerprint::path("spaces");
    let tasks = RequestFingerprint::new("space/tasks", [("label", "1")]);
    store.set(&spaces, CacheEntry::fetched(spaces.clone(), json!([{"id": "s1"}]), Utc::now()));
    store.set(&tasks, CacheEntry::fetched(tasks.clone(), json!([{"id": "t1", "rank": "V"}]), Utc::now()));
    store
  }

  fn assert_same_values(a: &CacheStore, b: &CacheStore) {
    assert_eq!(a.keys(), b.keys());
    for key in a.keys() {
      assert_eq!(a.get(&key).unwrap().value, b.get(&key).unwrap().value);
    }
  }

  #[test]
  fn test_blob_lives_under_well_known_key() {
    let persistence = KeyValuePersistence::new(MemoryKeyValueStore::default());
    persistence.save(&populated_store().snapshot()).unwrap();

    assert!(persistence.store().get(WELL_KNOWN_KEY).unwrap().is_some());
  }

  #[test]
  fn test_memory_round_trip() {
    let persistence = KeyValuePersistence::new(MemoryKeyValueStore::default());
    let store = populated_store();
    persistence.save(&store.snapshot()).unwrap();

    let fresh = CacheStore::new();
    fresh.restore(persistence.load().unwrap());
    assert_same_values(&store, &fresh);
  }

  #[test]
  fn test_sqlite_round_trip_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db").join("kv.db");
    let store = populated_store();

    {
      let persistence = KeyValuePersistence::new(SqliteKeyValueStore::open(&path).unwrap());
      persistence.save(&store.snapshot()).unwrap();
    }

    let persistence = KeyValuePersistence::new(SqliteKeyValueStore::open(&path).unwrap());
    let fresh = CacheStore::new();
    fresh.restore(persistence.load().unwrap());
    assert_same_values(&store, &fresh);
  }

  #[test]
  fn test_sqlite_missing_key_is_empty() {
    let persistence = KeyValuePersistence::new(SqliteKeyValueStore::open_in_memory().unwrap());
    assert!(persistence.load().unwrap().is_empty());
  }

  #[test]
  fn test_clear_removes_blob() {
    let persistence = KeyValuePersistence::new(SqliteKeyValueStore::open_in_memory().unwrap());
    persistence.save(&populated_store().snapshot()).unwrap();

    persistence.clear().unwrap();

    assert!(persistence.load().unwrap().is_empty());
  }
}
