use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::EngineSettings;

/// API base URL used in development when none is configured.
pub const DEFAULT_DEV_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  #[default]
  Development,
  Production,
}

impl Environment {
  pub fn as_str(&self) -> &'static str {
    match self {
      Environment::Development => "development",
      Environment::Production => "production",
    }
  }
}

impl fmt::Display for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Environment {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_lowercase().as_str() {
      "development" | "dev" => Ok(Environment::Development),
      "production" | "prod" => Ok(Environment::Production),
      other => Err(eyre!("Unknown environment '{}', expected development or production", other)),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default)]
  pub environment: Environment,
  /// Base URL of the API (required in production)
  pub base_url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      environment: Environment::default(),
      base_url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds a fetched value stays fresh for new subscribers; null disables
  /// time-based staleness
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: Option<u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
    }
  }
}

fn default_stale_time_secs() -> Option<u64> {
  Some(300)
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  /// One JSON file in the cache directory, saved debounced
  #[default]
  Filesystem,
  /// SQLite key/value blob, saved when the process is hidden
  Keyvalue,
  /// Keep the cache in memory only
  None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  #[serde(default)]
  pub backend: BackendKind,
  /// Overrides the platform cache/data directory
  pub directory: Option<PathBuf>,
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      backend: BackendKind::default(),
      directory: None,
      debounce_ms: default_debounce_ms(),
    }
  }
}

fn default_debounce_ms() -> u64 {
  500
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./spacesync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/spacesync/config.yaml
  ///
  /// Without any file the development defaults apply. `SPACESYNC_ENV`
  /// overrides the configured environment.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_environment_override(std::env::var("SPACESYNC_ENV").ok().as_deref())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("spacesync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("spacesync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Apply an environment name given outside the file (blank is ignored).
  pub fn with_environment_override(mut self, environment: Option<&str>) -> Result<Self> {
    if let Some(name) = environment.filter(|s| !s.trim().is_empty()) {
      self.api.environment = name.parse()?;
    }
    Ok(self)
  }

  /// Base URL for API requests.
  pub fn base_url(&self) -> Result<String> {
    match (&self.api.base_url, self.api.environment) {
      (Some(url), _) => Ok(url.trim_end_matches('/').to_string()),
      (None, Environment::Development) => Ok(DEFAULT_DEV_BASE_URL.to_string()),
      (None, Environment::Production) => Err(eyre!(
        "api.base_url must be set when the environment is production"
      )),
    }
  }

  /// Name separating persisted caches of different environments and servers.
  pub fn namespace(&self) -> Result<String> {
    Ok(crate::persist::namespace(self.api.environment.as_str(), &self.base_url()?))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.persistence.debounce_ms)
  }

  pub fn engine_settings(&self) -> EngineSettings {
    EngineSettings {
      stale_time: self.cache.stale_time_secs.map(Duration::from_secs),
    }
  }

  /// Get the API token from the environment.
  ///
  /// Reads SPACESYNC_TOKEN; a blank value counts as missing.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SPACESYNC_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
