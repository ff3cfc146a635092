//! Cache layer that orchestrates the store, fetcher, scheduler and persistence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::entry::{CacheEntry, SyncState};
use super::fingerprint::{Params, RequestFingerprint};
use super::scheduler::{KeyState, RevalidationScheduler};
use super::store::CacheStore;
use super::subscription::Subscription;
use super::traits::{CacheResult, Resource};
use crate::error::{ErrorInfo, ErrorKind, FetchError};
use crate::event::LifecycleEvent;
use crate::persist::{Persister, PersistenceProvider};
use crate::remote::Fetcher;

/// Result of a fetch, shared by every caller that joined it.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Value>, FetchError>>>;

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
  /// How long a fetched value counts as fresh for new subscribers.
  /// `None` means values only go stale through lifecycle or explicit refresh.
  pub stale_time: Option<Duration>,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      stale_time: Some(Duration::from_secs(5 * 60)),
    }
  }
}

struct InFlight {
  /// Mutation revision of the entry when the fetch started
  revision: u64,
  /// Store epoch when the fetch started
  epoch: u64,
  /// A network write for the key was outstanding when the fetch started, so
  /// the response may predate it
  during_write: bool,
  result: SharedFetch,
}

pub(super) struct Inner {
  pub(super) store: Arc<CacheStore>,
  pub(super) fetcher: Fetcher,
  scheduler: RevalidationScheduler,
  in_flight: Mutex<HashMap<RequestFingerprint, InFlight>>,
  pub(super) write_chains: Mutex<HashMap<RequestFingerprint, Shared<BoxFuture<'static, ()>>>>,
  /// Outstanding network writes per key
  pub(super) pending_writes: Mutex<HashMap<RequestFingerprint, usize>>,
  persister: Option<Arc<Persister>>,
}

/// The stale-while-revalidate engine.
///
/// Cheap to clone; clones share one store. All constructors and most methods
/// spawn tokio tasks and must run inside a runtime.
#[derive(Clone)]
pub struct CacheLayer {
  pub(super) inner: Arc<Inner>,
}

impl CacheLayer {
  /// Create an engine without persistence.
  pub fn new(fetcher: Fetcher, settings: EngineSettings) -> Self {
    Self::build(fetcher, settings, None)
  }

  /// Create an engine pre-populated from `provider` and persisting back to it.
  pub fn with_persistence(
    fetcher: Fetcher,
    settings: EngineSettings,
    provider: Arc<dyn PersistenceProvider>,
  ) -> Self {
    Self::build(fetcher, settings, Some(provider))
  }

  fn build(
    fetcher: Fetcher,
    settings: EngineSettings,
    provider: Option<Arc<dyn PersistenceProvider>>,
  ) -> Self {
    let store = Arc::new(CacheStore::new());

    let persister = provider.map(|provider| {
      store.restore(Persister::load(provider.as_ref()));
      let persister = Persister::new(provider, &store);
      let hook = Arc::downgrade(&persister);
      store.set_write_hook(Arc::new(move || {
        if let Some(persister) = hook.upgrade() {
          persister.notify_write();
        }
      }));
      persister
    });

    Self {
      inner: Arc::new(Inner {
        store,
        fetcher,
        scheduler: RevalidationScheduler::new(settings.stale_time),
        in_flight: Mutex::new(HashMap::new()),
        write_chains: Mutex::new(HashMap::new()),
        pending_writes: Mutex::new(HashMap::new()),
        persister,
      }),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.inner.store
  }

  pub fn fetcher(&self) -> &Fetcher {
    &self.inner.fetcher
  }

  pub fn state_of(&self, key: &RequestFingerprint) -> KeyState {
    let entry = self
      .inner
      .store
      .get(key)
      .unwrap_or_else(|| CacheEntry::empty(key.clone()));
    self.inner.scheduler.state_of(&entry, Utc::now())
  }

  /// Whether a network write for `key` has not answered yet.
  pub fn has_pending_write(&self, key: &RequestFingerprint) -> bool {
    self.inner.pending_writes.lock().contains_key(key)
  }

  // ==========================================================================
  // Fetching
  // ==========================================================================

  /// Start (or join) the fetch for `key`.
  ///
  /// The entry is marked validating before this returns. The fetch runs on
  /// its own task and always writes its result, even if every caller drops
  /// the returned future.
  pub fn revalidate(&self, key: &RequestFingerprint) -> SharedFetch {
    let mut in_flight = self.inner.in_flight.lock();
    if let Some(existing) = in_flight.get(key) {
      debug!(%key, "joining in-flight fetch");
      return existing.result.clone();
    }
    self.start_fetch(key, &mut in_flight)
  }

  /// Fetch `key`, deduplicated against any fetch already in flight.
  pub async fn fetch(&self, key: &RequestFingerprint) -> Result<Arc<Value>, FetchError> {
    self.revalidate(key).await
  }

  /// Explicit refresh: like `fetch`, but never settles for a fetch that
  /// started before the latest local mutation of `key` or before its last
  /// network write answered.
  pub async fn refresh(&self, key: &RequestFingerprint) -> Result<Arc<Value>, FetchError> {
    loop {
      let (fetch, outdated) = {
        let mut in_flight = self.inner.in_flight.lock();
        let revision = self.inner.store.get(key).map_or(0, |e| e.revision);
        match in_flight.get(key) {
          Some(existing) => {
            let outdated = existing.revision != revision
              || (existing.during_write && !self.has_pending_write(key));
            (existing.result.clone(), outdated)
          }
          None => (self.start_fetch(key, &mut in_flight), false),
        }
      };

      if !outdated {
        return fetch.await;
      }
      debug!(%key, "waiting for outdated fetch before refreshing");
      let _ = fetch.await;
    }
  }

  fn start_fetch(
    &self,
    key: &RequestFingerprint,
    in_flight: &mut HashMap<RequestFingerprint, InFlight>,
  ) -> SharedFetch {
    let (_, marked) = self.inner.store.update(key, |current| CacheEntry {
      is_validating: true,
      ..current.clone()
    });
    let revision = marked.revision;
    let epoch = self.inner.store.epoch();
    let during_write = self.has_pending_write(key);

    let layer = self.clone();
    let task_key = key.clone();
    let task = tokio::spawn(async move {
      layer
        .run_fetch(task_key, revision, epoch, during_write)
        .await
    });

    let result = async move {
      task
        .await
        .unwrap_or_else(|e| Err(FetchError::Network(format!("fetch task failed: {}", e))))
    }
    .boxed()
    .shared();

    debug!(%key, during_write, "fetch started");
    in_flight.insert(
      key.clone(),
      InFlight {
        revision,
        epoch,
        during_write,
        result: result.clone(),
      },
    );
    result
  }

  async fn run_fetch(
    &self,
    key: RequestFingerprint,
    started_at_revision: u64,
    started_in_epoch: u64,
    started_during_write: bool,
  ) -> Result<Arc<Value>, FetchError> {
    let result = self
      .inner
      .fetcher
      .fetch_authenticated(&key)
      .await
      .map(Arc::new);

    // Hold the in-flight lock across the write so a new fetch cannot start
    // between clearing `is_validating` and removing this one.
    let mut in_flight = self.inner.in_flight.lock();
    let store = &self.inner.store;

    if store.epoch() != started_in_epoch {
      debug!(%key, "discarding fetch result from before the cache was cleared");
    } else {
      // the server may not have applied an outstanding write yet
      let superseded = started_during_write || self.has_pending_write(&key);
      if superseded {
        debug!(%key, "keeping optimistic value over response that predates a write");
      }
      let now = Utc::now();
      store.update(&key, |current| {
        let mut next = current.clone();
        next.is_validating = false;
        match &result {
          Ok(value) if current.revision == started_at_revision && !superseded => {
            next.value = Some(value.clone());
            next.last_fetched_at = Some(now);
            next.error = None;
            next.sync = SyncState::Synced;
          }
          Ok(_) => {}
          Err(err) => next.error = Some(ErrorInfo::new(err, now)),
        }
        next
      });
    }

    // after a reset the slot may already belong to a newer fetch
    if in_flight.get(&key).is_some_and(|f| f.epoch == started_in_epoch) {
      in_flight.remove(&key);
    }
    drop(in_flight);

    match &result {
      Ok(_) => debug!(%key, observers = store.observer_count(&key), "fetch completed"),
      Err(e) => warn!(%key, error = %e, "fetch failed"),
    }
    result
  }

  /// Cache-first typed read with offline fallback.
  ///
  /// 1. Fresh cached value: return it without a round trip
  /// 2. Otherwise fetch (joining any in-flight fetch)
  /// 3. On network failure, return the stale cached value (offline mode)
  pub async fn get<T: Resource>(&self, params: Params) -> Result<CacheResult<T>, FetchError> {
    let key = RequestFingerprint::new(T::resource_path(), params);
    let cached = self.inner.store.get(&key);

    if let Some(entry) = &cached {
      let state = self.inner.scheduler.state_of(entry, Utc::now());
      if let (KeyState::Fresh, Some(value)) = (state, entry.value()) {
        let data = serde_json::from_value(value.clone())?;
        return Ok(CacheResult::from_cache(data, entry.last_fetched_at, false));
      }
    }

    match self.fetch(&key).await {
      Ok(value) => Ok(CacheResult::from_network(serde_json::from_value(
        (*value).clone(),
      )?)),
      Err(err) => {
        let Some((value, fetched_at)) = cached.and_then(|e| e.value.clone().map(|v| (v, e.last_fetched_at))) else {
          return Err(err);
        };
        let data = serde_json::from_value((*value).clone())?;
        match err.kind() {
          ErrorKind::Network => Ok(CacheResult::offline(data, fetched_at)),
          ErrorKind::Server(_) => Ok(CacheResult::from_cache(data, fetched_at, true)),
          _ => Err(err),
        }
      }
    }
  }

  // ==========================================================================
  // Subscriptions
  // ==========================================================================

  /// Observe `resource_path` with `params`.
  ///
  /// `None` params is the "do not fetch" sentinel for conditional queries: the
  /// subscription is inert and never touches the network.
  pub fn subscribe(&self, resource_path: &str, params: Option<Params>) -> Subscription {
    match params {
      Some(params) => self.subscribe_key(RequestFingerprint::new(resource_path, params)),
      None => Subscription::inert(),
    }
  }

  pub fn subscribe_key(&self, key: RequestFingerprint) -> Subscription {
    let rx = self.inner.store.observe(&key);
    let current = self.inner.store.get(&key);
    if self.has_pending_write(&key) {
      debug!(%key, "write pending, deferring revalidation to the mutation");
    } else if self
      .inner
      .scheduler
      .should_revalidate_on_subscribe(current.as_ref(), Utc::now())
    {
      let _ = self.revalidate(&key);
    }
    Subscription::new(key, rx, self.clone())
  }

  // ==========================================================================
  // Invalidation and lifecycle
  // ==========================================================================

  /// Drop every cached entry under `resource_path`. Observed keys are
  /// refetched instead so their subscribers keep a displayable value.
  pub fn invalidate_path(&self, resource_path: &str) {
    let probe = RequestFingerprint::path(resource_path);
    for key in self.inner.store.keys() {
      if key.resource_path() != probe.resource_path() {
        continue;
      }
      if self.inner.store.observer_count(&key) > 0 {
        let _ = self.revalidate(&key);
      } else {
        self.inner.store.delete(&key);
      }
    }
  }

  /// React to a foreground/background transition.
  pub async fn handle_lifecycle(&self, event: LifecycleEvent) {
    let keys = self
      .inner
      .scheduler
      .on_lifecycle(event, &self.inner.store, Utc::now());

    match event {
      LifecycleEvent::Foreground => {
        for key in keys.iter().filter(|key| !self.has_pending_write(key)) {
          let _ = self.revalidate(key);
        }
      }
      LifecycleEvent::Background | LifecycleEvent::Hidden => self.flush().await,
    }
  }

  /// Write unsaved changes through the persistence provider now.
  pub async fn flush(&self) {
    if let Some(persister) = &self.inner.persister {
      persister.flush().await;
    }
  }

  /// Sign-out: empty the store and forget the persisted copy.
  pub fn reset(&self) {
    {
      // fetches of the old session must not be joined by new callers
      let mut in_flight = self.inner.in_flight.lock();
      in_flight.clear();
      self.inner.store.clear();
    }
    // after the store: clearing it marks the persister dirty
    if let Some(persister) = &self.inner.persister {
      persister.clear();
    }
    info!("cache reset");
  }
}
