use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use super::entry::CacheEntry;
use super::fingerprint::RequestFingerprint;
use super::layer::{CacheLayer, SharedFetch};
use crate::error::ErrorInfo;

/// A live view of one cache key.
///
/// Reading never blocks and never fetches. While a subscription is alive its
/// key counts as observed, which makes it eligible for lifecycle
/// revalidation. Dropping it unsubscribes.
pub struct Subscription {
  key: Option<RequestFingerprint>,
  rx: Option<watch::Receiver<CacheEntry>>,
  layer: Option<CacheLayer>,
}

impl Subscription {
  pub(super) fn new(key: RequestFingerprint, rx: watch::Receiver<CacheEntry>, layer: CacheLayer) -> Self {
    Self {
      key: Some(key),
      rx: Some(rx),
      layer: Some(layer),
    }
  }

  /// Subscription for a conditional query that is switched off.
  pub(super) fn inert() -> Self {
    Self {
      key: None,
      rx: None,
      layer: None,
    }
  }

  /// The observed key, `None` for an inert subscription.
  pub fn key(&self) -> Option<&RequestFingerprint> {
    self.key.as_ref()
  }

  /// Copy of the current entry.
  pub fn current(&self) -> CacheEntry {
    match (&self.rx, &self.key) {
      (Some(rx), _) => rx.borrow().clone(),
      (None, Some(key)) => CacheEntry::empty(key.clone()),
      (None, None) => CacheEntry::default(),
    }
  }

  /// Copy of the current entry, marking it seen.
  pub fn latest(&mut self) -> CacheEntry {
    match &mut self.rx {
      Some(rx) => rx.borrow_and_update().clone(),
      None => self.current(),
    }
  }

  pub fn value(&self) -> Option<Arc<Value>> {
    self.rx.as_ref().and_then(|rx| rx.borrow().value.clone())
  }

  pub fn is_validating(&self) -> bool {
    self.rx.as_ref().is_some_and(|rx| rx.borrow().is_validating)
  }

  pub fn error(&self) -> Option<ErrorInfo> {
    self.rx.as_ref().and_then(|rx| rx.borrow().error.clone())
  }

  /// Whether the entry changed since it was last marked seen by `changed`.
  pub fn has_changed(&self) -> bool {
    self
      .rx
      .as_ref()
      .is_some_and(|rx| rx.has_changed().unwrap_or(false))
  }

  /// Wait for the next change of the entry.
  ///
  /// Returns `false` if no change can ever arrive (inert subscription, or the
  /// engine is gone).
  pub async fn changed(&mut self) -> bool {
    match &mut self.rx {
      Some(rx) => rx.changed().await.is_ok(),
      None => false,
    }
  }

  /// Ask for a fresh copy of the key. Returns `None` for an inert
  /// subscription.
  pub fn revalidate(&self) -> Option<SharedFetch> {
    match (&self.layer, &self.key) {
      (Some(layer), Some(key)) => Some(layer.revalidate(key)),
      _ => None,
    }
  }

  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    // the receiver must be gone before the store counts observers
    self.rx.take();
    if let (Some(layer), Some(key)) = (&self.layer, &self.key) {
      layer.store().release(key);
    }
  }
}
