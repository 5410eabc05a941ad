use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{SqliteStorage, StoreId};
use crate::manifest::{self, ManifestEntry};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the host application is served from. Manifest paths resolve
  /// against it and only its responses count as same-origin.
  pub origin: String,
  pub cache: CacheConfig,
  /// Pause between the two background warming stages
  pub warm_delay_ms: u64,
  /// Per-request network timeout; unset means none
  pub request_timeout_secs: Option<u64>,
  pub manifest: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub name: String,
  /// Changing this rotates the store: the old one is dropped on activation
  pub version: String,
  /// SQLite file (default: $XDG_DATA_HOME/imgcache/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "long-ago-images".to_string(),
      version: "v2".to_string(),
      path: None,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5173/".to_string(),
      cache: CacheConfig::default(),
      warm_delay_ms: 2000,
      request_timeout_secs: None,
      manifest: manifest::default_entries(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./imgcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/imgcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("imgcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("imgcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Replace the configured cache version, rejecting one that is unusable.
  pub fn set_cache_version(&mut self, version: String) -> Result<()> {
    self.cache.version = version;
    self.validate()
  }

  /// Check the fields every store and request depends on.
  fn validate(&self) -> Result<()> {
    if self.cache.name.trim().is_empty() || self.cache.version.trim().is_empty() {
      return Err(eyre!("cache.name and cache.version must not be empty"));
    }
    self.origin_url()?;
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  pub fn store_id(&self) -> StoreId {
    StoreId::new(&self.cache.name, &self.cache.version)
  }

  pub fn warm_delay(&self) -> Duration {
    Duration::from_millis(self.warm_delay_ms)
  }

  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::manifest::MediaClass;

  #[test]
  fn test_defaults_match_builtin_cache() {
    let config = Config::default();
    assert_eq!(config.store_id().storage_name(), "long-ago-images-v2");
    assert_eq!(config.warm_delay(), Duration::from_secs(2));
    assert_eq!(config.manifest.len(), 20);
    assert!(config.request_timeout_secs.is_none());
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      r#"
origin: https://game.example.com/
cache:
  version: v3
"#,
    )
    .unwrap();

    assert_eq!(config.origin_url().unwrap().as_str(), "https://game.example.com/");
    assert_eq!(config.cache.name, "long-ago-images");
    assert_eq!(config.cache.version, "v3");
    assert_eq!(config.warm_delay_ms, 2000);
    assert_eq!(config.manifest.len(), 20);
  }

  #[test]
  fn test_manifest_override() {
    let config = Config::parse(
      r#"
warm_delay_ms: 50
manifest:
  - url: /bg.svg
    class: critical
  - url: /one.png
    class: bulk-primary
"#,
    )
    .unwrap();

    assert_eq!(config.warm_delay(), Duration::from_millis(50));
    assert_eq!(config.manifest.len(), 2);
    assert_eq!(config.manifest[1].media_class, MediaClass::BulkPrimary);
  }

  #[test]
  fn test_empty_version_rejected() {
    assert!(Config::parse("cache:\n  version: ''\n").is_err());
  }

  #[test]
  fn test_version_override_is_validated() {
    let mut config = Config::default();
    assert!(config.set_cache_version(String::new()).is_err());

    config.set_cache_version("v9".to_string()).unwrap();
    assert_eq!(config.store_id().storage_name(), "long-ago-images-v9");
  }

  #[test]
  fn test_bad_origin_rejected() {
    assert!(Config::parse("origin: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn test_load_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("imgcache.yaml");
    std::fs::write(&path, "cache:\n  path: /tmp/x.db\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/x.db"));
  }
}
