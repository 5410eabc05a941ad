use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CachedEntry, RequestKey, StoreId};

/// Handle on one named store inside a storage backend.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> CacheStore<S> {
  /// Open the store, creating it if needed.
  pub fn open(storage: Arc<S>, id: &StoreId) -> Result<Self> {
    let store = Self::handle(storage, id);
    store.storage.open_store(&store.name)?;
    Ok(store)
  }

  /// Handle without touching the backend. Reads on a missing store are misses
  /// and writes fail.
  pub fn handle(storage: Arc<S>, id: &StoreId) -> Self {
    Self {
      storage,
      name: id.storage_name(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    self.storage.get_entry(&self.name, key)
  }

  pub fn put(&self, key: &RequestKey, entry: &CachedEntry) -> Result<()> {
    self.storage.put_entry(&self.name, key, entry)
  }

  pub fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.entry_keys(&self.name)
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      name: self.name.clone(),
    }
  }
}
