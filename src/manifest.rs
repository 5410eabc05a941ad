//! Static list of assets the agent keeps warm.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// When an asset is fetched ahead of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaClass {
  /// Fetched during install, before the agent serves anything
  Critical,
  /// First warming stage after activation
  BulkPrimary,
  /// Second warming stage, after the quiescence delay
  BulkSecondary,
}

/// One manifest line as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
  /// Absolute URL, or a path resolved against the configured origin
  pub url: String,
  #[serde(default)]
  pub priority: u32,
  #[serde(rename = "class", alias = "media_class")]
  pub media_class: MediaClass,
}

impl ManifestEntry {
  fn new(url: &str, priority: u32, media_class: MediaClass) -> Self {
    Self {
      url: url.to_string(),
      priority,
      media_class,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
  pub url: Url,
  pub priority: u32,
  pub media_class: MediaClass,
}

/// Manifest with every URL resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetManifest {
  assets: Vec<Asset>,
}

impl AssetManifest {
  pub fn resolve(entries: &[ManifestEntry], origin: &Url) -> Result<Self> {
    let assets = entries
      .iter()
      .map(|entry| {
        let url = origin
          .join(&entry.url)
          .map_err(|e| eyre!("Invalid manifest URL '{}': {}", entry.url, e))?;
        Ok(Asset {
          url,
          priority: entry.priority,
          media_class: entry.media_class,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { assets })
  }

  /// URLs of one class, lowest priority value first. Ties keep manifest order.
  pub fn urls(&self, class: MediaClass) -> Vec<Url> {
    let mut selected: Vec<&Asset> = self
      .assets
      .iter()
      .filter(|a| a.media_class == class)
      .collect();
    selected.sort_by_key(|a| a.priority);
    selected.into_iter().map(|a| a.url.clone()).collect()
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }
}

/// Built-in manifest: two backgrounds needed before first paint, then the
/// still mode images, then their animated counterparts.
pub fn default_entries() -> Vec<ManifestEntry> {
  let mut entries = vec![
    ManifestEntry::new("/src/assets/background.svg", 0, MediaClass::Critical),
    ManifestEntry::new("/src/assets/backgroundGame.svg", 1, MediaClass::Critical),
  ];

  for mode in 0..9u32 {
    entries.push(ManifestEntry::new(
      &format!("/src/assets/images/modes/img/mode_{}_animals.png", mode),
      mode,
      MediaClass::BulkPrimary,
    ));
  }

  for mode in 0..9u32 {
    entries.push(ManifestEntry::new(
      &format!("/src/assets/images/modes/gif/mode_{}.gif", mode),
      mode,
      MediaClass::BulkSecondary,
    ));
  }

  entries
}
