//! In-process storage backend. Nothing survives the process.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::storage::CacheStorage;
use super::traits::{CachedEntry, RequestKey};

#[derive(Default)]
struct MemoryStore {
  /// digest -> (write sequence, key, entry)
  entries: HashMap<String, (u64, RequestKey, CachedEntry)>,
}

#[derive(Default)]
struct MemoryState {
  /// Stores in creation order
  stores: Vec<(String, MemoryStore)>,
  controller: Option<String>,
  next_seq: u64,
}

impl MemoryState {
  fn store(&self, name: &str) -> Option<&MemoryStore> {
    self.stores.iter().find(|(n, _)| n == name).map(|(_, s)| s)
  }
}

#[derive(Default)]
pub struct MemoryStorage {
  state: Mutex<MemoryState>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
    self.state.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_store(&self, store: &str) -> Result<()> {
    let mut state = self.lock()?;
    if state.store(store).is_none() {
      state.stores.push((store.to_string(), MemoryStore::default()));
    }
    Ok(())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let state = self.lock()?;
    Ok(state.stores.iter().map(|(name, _)| name.clone()).collect())
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let mut state = self.lock()?;
    let before = state.stores.len();
    state.stores.retain(|(name, _)| name != store);
    Ok(state.stores.len() != before)
  }

  fn get_entry(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let state = self.lock()?;
    Ok(
      state
        .store(store)
        .and_then(|s| s.entries.get(&key.digest()))
        .map(|(_, _, entry)| entry.clone()),
    )
  }

  fn put_entry(&self, store: &str, key: &RequestKey, entry: &CachedEntry) -> Result<()> {
    let mut state = self.lock()?;
    let seq = state.next_seq;
    state.next_seq += 1;

    let target = state
      .stores
      .iter_mut()
      .find(|(name, _)| name == store)
      .map(|(_, s)| s)
      .ok_or_else(|| eyre!("Store {} does not exist", store))?;

    target
      .entries
      .insert(key.digest(), (seq, key.clone(), entry.clone()));
    Ok(())
  }

  fn entry_keys(&self, store: &str) -> Result<Vec<RequestKey>> {
    let state = self.lock()?;
    let Some(target) = state.store(store) else {
      return Ok(Vec::new());
    };

    let mut keyed: Vec<_> = target
      .entries
      .values()
      .map(|(seq, key, _)| (*seq, key.clone()))
      .collect();
    keyed.sort_by_key(|(seq, _)| *seq);
    Ok(keyed.into_iter().map(|(_, key)| key).collect())
  }

  fn controller(&self) -> Result<Option<String>> {
    Ok(self.lock()?.controller.clone())
  }

  fn set_controller(&self, store: &str) -> Result<()> {
    self.lock()?.controller = Some(store.to_string());
    Ok(())
  }
}
