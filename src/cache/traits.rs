//! Core traits and types for typed access to the cache.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// Trait for types that can be decoded from (and encoded into) a cached value.
///
/// The cache itself stores opaque JSON. Implementors supply the resource path
/// they are served from; serde supplies the decode/encode pair.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Resource path this type is fetched from (e.g. "space/labels")
  fn resource_path() -> &'static str;
}

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched from the server. `None` only for cached
  /// values that were never fetched (written locally).
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Data that just arrived from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: Some(Utc::now()),
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, fetched_at: Option<DateTime<Utc>>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      fetched_at,
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, fetched_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      fetched_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, considered stale but refetch failed with a server error
  CacheStale,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}
