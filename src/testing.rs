//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use color_eyre::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::RequestFingerprint;
use crate::error::FetchError;
use crate::persist::{PersistedCache, PersistenceProvider, SaveTrigger};
use crate::remote::{NetworkWrite, Transport};

/// In-memory `Transport` answering from a per-path script.
pub struct ScriptedTransport {
  responses: Mutex<HashMap<String, Result<Value, FetchError>>>,
  write_result: Mutex<Result<Value, FetchError>>,
  delay: Mutex<Duration>,
  gets: AtomicUsize,
  gets_by_path: Mutex<HashMap<String, usize>>,
  writes: Mutex<Vec<NetworkWrite>>,
  last_token: Mutex<Option<String>>,
}

impl ScriptedTransport {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      write_result: Mutex::new(Ok(Value::Null)),
      delay: Mutex::new(Duration::ZERO),
      gets: AtomicUsize::new(0),
      gets_by_path: Mutex::new(HashMap::new()),
      writes: Mutex::new(Vec::new()),
      last_token: Mutex::new(None),
    }
  }

  /// Answer every GET of `path` with `result`.
  pub fn respond(&self, path: &str, result: Result<Value, FetchError>) {
    self.responses.lock().insert(path.to_string(), result);
  }

  /// Answer every write with `result`.
  pub fn respond_to_writes(&self, result: Result<Value, FetchError>) {
    *self.write_result.lock() = result;
  }

  /// Hold every request for `delay` before answering.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock() = delay;
  }

  pub fn get_count(&self) -> usize {
    self.gets.load(Ordering::SeqCst)
  }

  pub fn get_count_for(&self, path: &str) -> usize {
    self.gets_by_path.lock().get(path).copied().unwrap_or(0)
  }

  pub fn writes(&self) -> Vec<NetworkWrite> {
    self.writes.lock().clone()
  }

  pub fn last_token(&self) -> Option<String> {
    self.last_token.lock().clone()
  }
}

impl Transport for ScriptedTransport {
  fn get<'a>(&'a self, key: &'a RequestFingerprint, token: &'a str) -> BoxFuture<'a, Result<Value, FetchError>> {
    async move {
      self.gets.fetch_add(1, Ordering::SeqCst);
      *self
        .gets_by_path
        .lock()
        .entry(key.resource_path().to_string())
        .or_default() += 1;
      *self.last_token.lock() = Some(token.to_string());

      let delay = *self.delay.lock();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }

      self
        .responses
        .lock()
        .get(key.resource_path())
        .cloned()
        .unwrap_or_else(|| Err(FetchError::Network("no route".into())))
    }
    .boxed()
  }

  fn send<'a>(&'a self, write: &'a NetworkWrite, token: &'a str) -> BoxFuture<'a, Result<Value, FetchError>> {
    async move {
      *self.last_token.lock() = Some(token.to_string());
      let delay = *self.delay.lock();
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      self.writes.lock().push(write.clone());
      self.write_result.lock().clone()
    }
    .boxed()
  }
}

/// Provider that counts physical writes and keeps the last one in memory.
pub struct CountingPersistence {
  trigger: SaveTrigger,
  saves: AtomicUsize,
  stored: Mutex<PersistedCache>,
}

impl CountingPersistence {
  pub fn new(trigger: SaveTrigger) -> Self {
    Self {
      trigger,
      saves: AtomicUsize::new(0),
      stored: Mutex::new(Vec::new()),
    }
  }

  pub fn save_count(&self) -> usize {
    self.saves.load(Ordering::SeqCst)
  }

  pub fn stored(&self) -> PersistedCache {
    self.stored.lock().clone()
  }
}

impl PersistenceProvider for CountingPersistence {
  fn load(&self) -> Result<PersistedCache> {
    Ok(self.stored.lock().clone())
  }

  fn save(&self, snapshot: &PersistedCache) -> Result<()> {
    self.saves.fetch_add(1, Ordering::SeqCst);
    *self.stored.lock() = snapshot.clone();
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self.stored.lock().clear();
    Ok(())
  }

  fn trigger(&self) -> SaveTrigger {
    self.trigger
  }

  fn name(&self) -> &'static str {
    "counting"
  }
}
