//! Cache entries and their synchronization bookkeeping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::fingerprint::RequestFingerprint;
use crate::error::ErrorInfo;

/// How the current value of an entry came to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
  /// Value was written by the last successful fetch
  #[default]
  Synced,
  /// Value is optimistic and an authoritative refetch will follow
  PendingRevalidation,
  /// Value is optimistic and treated as final; automatic revalidation skips it
  OptimisticFinal,
}

/// A single cached resource.
///
/// `value` is shared: every observer of the key holds the same allocation, so
/// a subscriber can cheaply tell whether the value actually changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  #[serde(skip)]
  pub key: RequestFingerprint,
  pub value: Option<Arc<Value>>,
  pub last_fetched_at: Option<DateTime<Utc>>,
  /// True only while a fetch for this key is in flight
  #[serde(skip)]
  pub is_validating: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorInfo>,
  #[serde(default)]
  pub sync: SyncState,
  /// Revision of the last local mutation write (0 if never mutated)
  #[serde(skip)]
  pub revision: u64,
}

impl CacheEntry {
  /// An entry with nothing in it yet.
  pub fn empty(key: RequestFingerprint) -> Self {
    Self {
      key,
      ..Self::default()
    }
  }

  /// Entry holding a freshly fetched value.
  pub fn fetched(key: RequestFingerprint, value: Value, at: DateTime<Utc>) -> Self {
    Self {
      key,
      value: Some(Arc::new(value)),
      last_fetched_at: Some(at),
      ..Self::default()
    }
  }

  /// True when the entry carries no information at all.
  pub fn is_empty(&self) -> bool {
    self.value.is_none()
      && self.last_fetched_at.is_none()
      && self.error.is_none()
      && !self.is_validating
  }

  pub fn value(&self) -> Option<&Value> {
    self.value.as_deref()
  }
}
