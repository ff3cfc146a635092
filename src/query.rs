//! Typed query views over the cache.
//!
//! Inspired by TanStack Query, a `Query<T>` wraps a cache subscription and
//! exposes it as loading/success/error states of a decoded `T`.
//!
//! # Example
//!
//! ```ignore
//! let mut labels: Query<Vec<Label>> = Query::new(&cache, Some(Params::new()));
//!
//! // In event loop tick
//! if labels.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! match labels.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(data) => render_labels(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::cache::{CacheEntry, CacheLayer, Params, Resource, Subscription};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query is switched off (no params)
  Idle,
  /// Nothing cached yet and a fetch is running
  Loading,
  /// A value is cached; it may be refreshing in the background
  Success(T),
  /// Nothing usable is cached and the last fetch failed
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Typed, stale-while-revalidate view of one resource.
///
/// Query<T> keeps:
/// - The subscription that keeps its key observed
/// - The decoded value, re-decoded only when the cached allocation changes
/// - Whether a background refresh is running
pub struct Query<T> {
  state: QueryState<T>,
  subscription: Subscription,
  decoded_from: Option<Arc<Value>>,
  refreshing: bool,
  last_error: Option<String>,
}

impl<T: Resource> Query<T> {
  /// Subscribe to `T` with `params`; `None` creates an idle query that never
  /// fetches.
  pub fn new(cache: &CacheLayer, params: Option<Params>) -> Self {
    let mut query = Self {
      state: QueryState::Idle,
      subscription: cache.subscribe(T::resource_path(), params),
      decoded_from: None,
      refreshing: false,
      last_error: None,
    };
    let entry = query.subscription.latest();
    query.apply(entry);
    query
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  /// Error of the last fetch, even when a cached value is still shown.
  pub fn last_error(&self) -> Option<&str> {
    self.last_error.as_deref()
  }

  /// True while cached data is shown and a refetch runs behind it.
  pub fn is_refreshing(&self) -> bool {
    self.refreshing
  }

  /// Ask the cache for a fresh copy. Data stays visible meanwhile.
  pub fn refetch(&mut self) {
    if let Some(fetch) = self.subscription.revalidate() {
      // the fetch runs on its own task; the result arrives through the subscription
      drop(fetch);
      self.poll();
    }
  }

  /// Pick up cache changes without waiting.
  ///
  /// Returns `true` if the entry changed since the last poll. Call this in
  /// your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    if !self.subscription.has_changed() {
      return false;
    }
    let entry = self.subscription.latest();
    self.apply(entry);
    true
  }

  /// Wait for the next cache change and apply it. Returns `false` for an idle
  /// query, which never changes.
  pub async fn next_change(&mut self) -> bool {
    if !self.subscription.changed().await {
      return false;
    }
    let entry = self.subscription.latest();
    self.apply(entry);
    true
  }

  fn apply(&mut self, entry: CacheEntry) {
    if self.subscription.key().is_none() {
      self.state = QueryState::Idle;
      return;
    }

    self.refreshing = entry.value.is_some() && entry.is_validating;
    self.last_error = entry.error.as_ref().map(|e| e.message.clone());

    match entry.value {
      Some(value) => {
        let unchanged = self
          .decoded_from
          .as_ref()
          .is_some_and(|seen| Arc::ptr_eq(seen, &value));
        if unchanged && self.state.is_success() {
          return;
        }
        match serde_json::from_value::<T>((*value).clone()) {
          Ok(data) => self.state = QueryState::Success(data),
          Err(e) => {
            debug!(path = T::resource_path(), error = %e, "cached value does not decode");
            self.state = QueryState::Error(format!("decode error: {}", e));
          }
        }
        self.decoded_from = Some(value);
      }
      None => {
        self.decoded_from = None;
        self.state = match (entry.is_validating, entry.error) {
          (true, _) => QueryState::Loading,
          (false, Some(error)) => QueryState::Error(error.message),
          (false, None) => QueryState::Loading,
        };
      }
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("key", &self.subscription.key())
      .field("refreshing", &self.refreshing)
      .finish_non_exhaustive()
  }
}
