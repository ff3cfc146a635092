//! A signed-in session: one engine, its persistence and its lifecycle channel.

use std::sync::Arc;

use color_eyre::Result;
use tracing::info;

use crate::cache::{CacheLayer, EngineSettings};
use crate::config::{BackendKind, Config};
use crate::event::{LifecycleEvent, LifecycleEvents};
use crate::persist::{
  FileSystemPersistence, KeyValuePersistence, PersistenceProvider, SqliteKeyValueStore,
};
use crate::remote::{Credentials, Fetcher, HttpTransport, Transport};

/// Owns the cache for as long as the user is signed in.
///
/// Created at sign-in with the persisted cache already loaded; torn down by
/// `sign_out` (which forgets everything) or `shutdown` (which saves first).
pub struct Session {
  cache: CacheLayer,
  credentials: Credentials,
  lifecycle: LifecycleEvents,
}

impl Session {
  /// Build a session from configuration. Must be called within a tokio
  /// runtime.
  pub fn start(config: &Config, credentials: Credentials) -> Result<Self> {
    let base_url = config.base_url()?;
    let transport = HttpTransport::new(&base_url, config.timeout())?;
    let provider = Self::provider(config)?;

    info!(
      environment = %config.api.environment,
      %base_url,
      backend = provider.as_ref().map_or("none", |p| p.name()),
      signed_in = credentials.is_signed_in(),
      "starting session"
    );
    Ok(Self::with_parts(
      Arc::new(transport),
      credentials,
      config.engine_settings(),
      provider,
    ))
  }

  /// Build a session from already constructed parts.
  pub fn with_parts(
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    settings: EngineSettings,
    provider: Option<Arc<dyn PersistenceProvider>>,
  ) -> Self {
    let fetcher = Fetcher::new(transport, credentials.clone());
    let cache = match provider {
      Some(provider) => CacheLayer::with_persistence(fetcher, settings, provider),
      None => CacheLayer::new(fetcher, settings),
    };
    let lifecycle = LifecycleEvents::spawn(cache.clone());

    Self {
      cache,
      credentials,
      lifecycle,
    }
  }

  /// The persistence backend selected by `config`, if any.
  fn provider(config: &Config) -> Result<Option<Arc<dyn PersistenceProvider>>> {
    let namespace = config.namespace()?;
    let directory = config.persistence.directory.as_ref().map(|d| d.join(&namespace));

    let provider: Arc<dyn PersistenceProvider> = match config.persistence.backend {
      BackendKind::None => return Ok(None),
      BackendKind::Filesystem => match directory {
        Some(dir) => Arc::new(FileSystemPersistence::new(dir, config.debounce())),
        None => Arc::new(FileSystemPersistence::open_default(&namespace, config.debounce())?),
      },
      BackendKind::Keyvalue => {
        let path = match directory {
          Some(dir) => dir.join("kv.db"),
          None => SqliteKeyValueStore::default_path(&namespace)?,
        };
        Arc::new(KeyValuePersistence::new(SqliteKeyValueStore::open(&path)?))
      }
    };
    Ok(Some(provider))
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn credentials(&self) -> &Credentials {
    &self.credentials
  }

  /// Forward a platform lifecycle signal to the engine.
  pub fn lifecycle(&self, event: LifecycleEvent) {
    self.lifecycle.send(event);
  }

  /// Forget the user: cancel pending saves, empty the cache, delete the
  /// persisted copy and drop the token.
  pub fn sign_out(&self) {
    self.cache.reset();
    self.credentials.clear();
    info!("signed out");
  }

  /// Handle queued lifecycle events, then save anything unsaved.
  pub async fn shutdown(self) {
    self.lifecycle.shutdown().await;
    self.cache.flush().await;
    info!("session closed");
  }
}
