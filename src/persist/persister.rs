use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, warn};

use super::debounce::Debouncer;
use super::{PersistedCache, PersistenceProvider, SaveTrigger};
use crate::cache::CacheStore;

/// Connects a store to its persistence provider.
///
/// Tracks whether anything changed since the last save and calls the
/// provider according to its `SaveTrigger`. Every save serializes a snapshot
/// taken at that moment, never a live reference.
pub struct Persister {
  provider: Arc<dyn PersistenceProvider>,
  store: Weak<CacheStore>,
  dirty: AtomicBool,
  debouncer: Option<Debouncer>,
}

impl Persister {
  /// Must be called within a tokio runtime when the provider is debounced.
  pub fn new(provider: Arc<dyn PersistenceProvider>, store: &Arc<CacheStore>) -> Arc<Self> {
    let store = Arc::downgrade(store);
    Arc::new_cyclic(|this: &Weak<Persister>| {
      let debouncer = match provider.trigger() {
        SaveTrigger::Debounced(window) => {
          let this = this.clone();
          Some(Debouncer::spawn(window, move || {
            if let Some(persister) = this.upgrade() {
              persister.save_now();
            }
          }))
        }
        SaveTrigger::OnHide => None,
      };

      Persister {
        provider,
        store,
        dirty: AtomicBool::new(false),
        debouncer,
      }
    })
  }

  /// Load the provider's snapshot. Failures yield an empty cache.
  pub fn load(provider: &dyn PersistenceProvider) -> PersistedCache {
    match provider.load() {
      Ok(snapshot) => {
        debug!(backend = provider.name(), entries = snapshot.len(), "restored cache");
        snapshot
      }
      Err(e) => {
        warn!(backend = provider.name(), error = %e, "failed to restore cache, starting empty");
        Vec::new()
      }
    }
  }

  /// Called after every store write.
  pub fn notify_write(&self) {
    self.dirty.store(true, Ordering::SeqCst);
    if let Some(debouncer) = &self.debouncer {
      debouncer.request();
    }
  }

  /// The process is being hidden: write out anything unsaved.
  pub async fn flush(&self) {
    match &self.debouncer {
      Some(debouncer) => debouncer.flush().await,
      None => self.save_now(),
    }
  }

  /// Save a snapshot now if anything changed since the last save.
  pub fn save_now(&self) {
    if !self.dirty.swap(false, Ordering::SeqCst) {
      return;
    }
    let Some(store) = self.store.upgrade() else {
      return;
    };

    let snapshot = store.snapshot();
    match self.provider.save(&snapshot) {
      Ok(()) => debug!(backend = self.provider.name(), entries = snapshot.len(), "saved cache"),
      Err(e) => {
        warn!(backend = self.provider.name(), error = %e, "failed to save cache");
        self.dirty.store(true, Ordering::SeqCst);
      }
    }
  }

  /// Drop pending work and forget the saved blob (sign-out).
  pub fn clear(&self) {
    if let Some(debouncer) = &self.debouncer {
      debouncer.cancel();
    }
    self.dirty.store(false, Ordering::SeqCst);
    if let Err(e) = self.provider.clear() {
      warn!(backend = self.provider.name(), error = %e, "failed to clear persisted cache");
    }
  }
}
