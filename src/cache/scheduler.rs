//! Decides when cached entries must be refetched.
//!
//! Revalidation is event-driven only: a new subscription, a return from the
//! background, or an explicit refresh. Nothing here polls or runs timers.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::entry::{CacheEntry, SyncState};
use super::fingerprint::RequestFingerprint;
use super::store::CacheStore;
use crate::event::LifecycleEvent;

/// Revalidation state of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
  Fresh,
  Stale,
  Validating,
  /// Stale because the last fetch failed
  Errored,
}

pub struct RevalidationScheduler {
  /// How long a fetched value counts as fresh for new subscribers
  stale_time: Option<Duration>,
  backgrounded_at: Mutex<Option<DateTime<Utc>>>,
}

impl RevalidationScheduler {
  pub fn new(stale_time: Option<std::time::Duration>) -> Self {
    Self {
      stale_time: stale_time.and_then(|d| Duration::from_std(d).ok()),
      backgrounded_at: Mutex::new(None),
    }
  }

  /// Check if a fetch timestamp is older than the stale time.
  fn is_expired(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    self
      .stale_time
      .is_some_and(|stale_time| now - fetched_at > stale_time)
  }

  pub fn state_of(&self, entry: &CacheEntry, now: DateTime<Utc>) -> KeyState {
    if entry.is_validating {
      return KeyState::Validating;
    }
    if entry.error.is_some() {
      return KeyState::Errored;
    }
    match (entry.sync, entry.last_fetched_at) {
      (SyncState::OptimisticFinal, _) => KeyState::Fresh,
      (SyncState::PendingRevalidation, _) => KeyState::Stale,
      (SyncState::Synced, None) => KeyState::Stale,
      (SyncState::Synced, Some(at)) if self.is_expired(at, now) => KeyState::Stale,
      (SyncState::Synced, Some(_)) => KeyState::Fresh,
    }
  }

  /// Whether a new observer of this entry should trigger a fetch.
  pub fn should_revalidate_on_subscribe(&self, entry: Option<&CacheEntry>, now: DateTime<Utc>) -> bool {
    let Some(entry) = entry else {
      return true;
    };
    if entry.is_validating || entry.sync == SyncState::OptimisticFinal {
      return false;
    }
    match entry.last_fetched_at {
      None => true,
      Some(at) => self.is_expired(at, now),
    }
  }

  /// Feed a lifecycle event; returns the keys that must be refetched now.
  pub fn on_lifecycle(
    &self,
    event: LifecycleEvent,
    store: &CacheStore,
    now: DateTime<Utc>,
  ) -> Vec<RequestFingerprint> {
    match event {
      LifecycleEvent::Background | LifecycleEvent::Hidden => {
        let mut backgrounded_at = self.backgrounded_at.lock();
        if backgrounded_at.is_none() {
          debug!(?event, "entering background");
          *backgrounded_at = Some(now);
        }
        Vec::new()
      }
      LifecycleEvent::Foreground => {
        let Some(since) = self.backgrounded_at.lock().take() else {
          return Vec::new();
        };

        let keys: Vec<_> = store
          .observed_keys()
          .into_iter()
          .filter(|key| match store.get(key) {
            None => true,
            Some(entry) => {
              !entry.is_validating
                && entry.sync != SyncState::OptimisticFinal
                && entry.last_fetched_at.map_or(true, |at| at <= since)
            }
          })
          .collect();

        info!(count = keys.len(), "back in foreground, revalidating observed keys");
        keys
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Arc;

  fn fetched(path: &str, at: DateTime<Utc>) -> CacheEntry {
    CacheEntry::fetched(RequestFingerprint::path(path), json!(1), at)
  }

  #[test]
  fn test_missing_entry_revalidates_on_subscribe() {
    let scheduler = RevalidationScheduler::new(None);
    assert!(scheduler.should_revalidate_on_subscribe(None, Utc::now()));
  }

  #[test]
  fn test_fresh_entry_does_not_revalidate() {
    let scheduler = RevalidationScheduler::new(Some(std::time::Duration::from_secs(300)));
    let now = Utc::now();
    let entry = fetched("spaces", now - Duration::seconds(10));
    assert!(!scheduler.should_revalidate_on_subscribe(Some(&entry), now));
    assert_eq!(scheduler.state_of(&entry, now), KeyState::Fresh);
  }

  #[test]
  fn test_expired_entry_is_stale() {
    let scheduler = RevalidationScheduler::new(Some(std::time::Duration::from_secs(60)));
    let now = Utc::now();
    let entry = fetched("spaces", now - Duration::seconds(120));
    assert!(scheduler.should_revalidate_on_subscribe(Some(&entry), now));
    assert_eq!(scheduler.state_of(&entry, now), KeyState::Stale);
  }

  #[test]
  fn test_optimistic_final_is_exempt() {
    let scheduler = RevalidationScheduler::new(Some(std::time::Duration::ZERO));
    let mut entry = CacheEntry::empty(RequestFingerprint::path("spaces"));
    entry.value = Some(Arc::new(json!({"pinned": true})));
    entry.sync = SyncState::OptimisticFinal;

    assert!(!scheduler.should_revalidate_on_subscribe(Some(&entry), Utc::now()));
    assert_eq!(scheduler.state_of(&entry, Utc::now()), KeyState::Fresh);
  }

  #[test]
  fn test_foreground_without_background_is_noop() {
    let scheduler = RevalidationScheduler::new(None);
    let store = CacheStore::new();
    let k = RequestFingerprint::path("spaces");
    let _rx = store.observe(&k);

    let keys = scheduler.on_lifecycle(LifecycleEvent::Foreground, &store, Utc::now());
    assert!(keys.is_empty());
  }

  #[test]
  fn test_foreground_selects_observed_keys_fetched_before_background() {
    let scheduler = RevalidationScheduler::new(None);
    let store = CacheStore::new();
    let now = Utc::now();

    let old = RequestFingerprint::path("space/labels");
    let newer = RequestFingerprint::path("space/tasks");
    let unobserved = RequestFingerprint::path("spaces");
    store.set(&old, fetched("space/labels", now - Duration::seconds(30)));
    store.set(&newer, fetched("space/tasks", now + Duration::seconds(5)));
    store.set(&unobserved, fetched("spaces", now - Duration::seconds(30)));
    let _a = store.observe(&old);
    let _b = store.observe(&newer);

    scheduler.on_lifecycle(LifecycleEvent::Background, &store, now);
    let keys = scheduler.on_lifecycle(LifecycleEvent::Foreground, &store, now + Duration::seconds(60));

    assert_eq!(keys, vec![old]);
  }

  #[test]
  fn test_hidden_keeps_earliest_background_moment() {
    let scheduler = RevalidationScheduler::new(None);
    let store = CacheStore::new();
    let t0 = Utc::now();
    let k = RequestFingerprint::path("space/labels");
    store.set(&k, fetched("space/labels", t0 + Duration::seconds(1)));
    let _rx = store.observe(&k);

    scheduler.on_lifecycle(LifecycleEvent::Background, &store, t0);
    scheduler.on_lifecycle(LifecycleEvent::Hidden, &store, t0 + Duration::seconds(2));
    let keys = scheduler.on_lifecycle(LifecycleEvent::Foreground, &store, t0 + Duration::seconds(3));

    assert!(keys.is_empty());
  }
}
