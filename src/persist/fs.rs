//! Filesystem persistence: one JSON document in a dedicated cache directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};

use super::{decode, encode, PersistedCache, PersistenceProvider, SaveTrigger};

const CACHE_FILE: &str = "cache.json";

pub struct FileSystemPersistence {
  dir: PathBuf,
  debounce: Duration,
}

impl FileSystemPersistence {
  pub fn new(dir: impl Into<PathBuf>, debounce: Duration) -> Self {
    Self {
      dir: dir.into(),
      debounce,
    }
  }

  /// Persistence under the platform cache directory, e.g.
  /// `~/.cache/spacesync/<namespace>/cache.json`.
  pub fn open_default(namespace: &str, debounce: Duration) -> Result<Self> {
    Ok(Self::new(Self::default_dir()?.join(namespace), debounce))
  }

  fn default_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory"))?;

    Ok(cache_dir.join("spacesync"))
  }

  pub fn path(&self) -> PathBuf {
    self.dir.join(CACHE_FILE)
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }
}

impl PersistenceProvider for FileSystemPersistence {
  fn load(&self) -> Result<PersistedCache> {
    let path = self.path();
    if !path.exists() {
      return Ok(Vec::new());
    }

    let bytes = std::fs::read(&path)
      .map_err(|e| eyre!("Failed to read cache file {}: {}", path.display(), e))?;
    decode(&bytes)
  }

  fn save(&self, snapshot: &PersistedCache) -> Result<()> {
    std::fs::create_dir_all(&self.dir)
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", self.dir.display(), e))?;

    let bytes = encode(snapshot)?;
    let path = self.path();
    let tmp = self.dir.join(format!("{}.tmp", CACHE_FILE));

    // write-then-rename so a crash never leaves a torn file behind
    std::fs::write(&tmp, bytes)
      .map_err(|e| eyre!("Failed to write cache file {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path)
      .map_err(|e| eyre!("Failed to replace cache file {}: {}", path.display(), e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let path = self.path();
    if path.exists() {
      std::fs::remove_file(&path)
        .map_err(|e| eyre!("Failed to remove cache file {}: {}", path.display(), e))?;
    }
    Ok(())
  }

  fn trigger(&self) -> SaveTrigger {
    SaveTrigger::Debounced(self.debounce)
  }

  fn name(&self) -> &'static str {
    "filesystem"
  }
}
