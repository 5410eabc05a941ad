//! Core types for the caching system.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// Identity of one versioned store, e.g. `long-ago-images` at `v2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId {
  pub name: String,
  pub version: String,
}

impl StoreId {
  pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
    }
  }

  /// Name under which the store is kept by the storage backend.
  pub fn storage_name(&self) -> String {
    format!("{}-{}", self.name, self.version)
  }
}

impl fmt::Display for StoreId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.name, self.version)
  }
}

/// Normalized request identity used to index a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  /// Upper-case the method and drop any fragment from the URL.
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.to_ascii_uppercase(),
      url: url.into(),
    }
  }

  /// Rebuild a key from values read back out of storage.
  pub(crate) fn from_parts(method: String, url: String) -> Self {
    Self { method, url }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hex digest, used as a stable fixed-length storage key.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A captured response as kept in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  /// When the entry was written. Informational; never used for freshness.
  pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
  pub fn new(status: u16, status_text: String, headers: Vec<(String, String)>, body: Bytes) -> Self {
    Self {
      status,
      status_text,
      headers,
      body,
      cached_at: Utc::now(),
    }
  }
}

/// Result of an intercepted request, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Served out of the store.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Fetched from the network and written back to the store.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Fetched from the network but not eligible for caching.
  pub fn uncached(data: T) -> Self {
    Self {
      data,
      source: CacheSource::NetworkUncached,
      cached_at: None,
    }
  }

  /// Network unavailable and nothing cached.
  pub fn placeholder(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Placeholder,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Cache,
  Network,
  NetworkUncached,
  Placeholder,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Cache => "cache",
      Self::Network => "network",
      Self::NetworkUncached => "network-uncached",
      Self::Placeholder => "placeholder",
    };
    f.write_str(s)
  }
}
