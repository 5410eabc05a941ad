use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::batch::add_all;
use super::warmer::{self, WarmReport};
use super::{Agent, LifecycleState};
use crate::cache::{CacheStorage, CacheStore};
use crate::manifest::MediaClass;
use crate::net::Fetcher;

impl<S, F> Agent<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  /// Open the current store and seed it with the critical assets.
  ///
  /// Always completes: a store that cannot be opened or a critical asset that
  /// cannot be fetched is logged and skipped. The agent is then ready to be
  /// activated right away.
  pub async fn install(&self) {
    self.set_state(LifecycleState::Installing);
    let store_id = self.store_id().clone();

    match CacheStore::open(Arc::clone(&self.inner.storage), &store_id) {
      Ok(store) => {
        let critical = self.inner.settings.manifest.urls(MediaClass::Critical);
        match add_all(&store, self.inner.fetcher.as_ref(), &critical).await {
          Ok(count) => info!(store = %store_id, count, "Cached critical assets"),
          Err(e) => warn!(store = %store_id, error = %e, "Critical assets not fully cached"),
        }
      }
      Err(e) => warn!(store = %store_id, error = %e, "Could not open cache store during install"),
    }

    self.set_state(LifecycleState::Installed);
  }

  /// Drop every stale store, claim control and start background warming.
  ///
  /// Returns as soon as control is claimed; the returned handle resolves
  /// when warming finishes and may be dropped.
  pub async fn activate(&self) -> JoinHandle<WarmReport> {
    let current = self.store().name().to_string();

    // Activating without a prior install still needs a store to warm into
    if let Err(e) = self.inner.storage.open_store(&current) {
      warn!(store = %current, error = %e, "Could not open cache store during activation");
    }

    match self.inner.storage.delete_all_except(&current) {
      Ok(deleted) => {
        for name in deleted {
          info!(store = %name, "Deleted stale cache store");
        }
      }
      Err(e) => warn!(error = %e, "Stale cache cleanup failed; will retry on next activation"),
    }

    let prior = match self.inner.storage.set_controller(&current) {
      Ok(()) => None,
      Err(e) => {
        warn!(error = %e, "Could not record controller claim; serving without it");
        Some(self.inner.storage.controller().ok().flatten())
      }
    };
    if let Ok(mut slot) = self.inner.prior_controller.lock() {
      *slot = prior.flatten();
    }
    self.inner.claimed.store(true, Ordering::SeqCst);
    self.set_state(LifecycleState::ActiveWarming);
    info!(store = %current, "Agent activated");

    let agent = self.clone();
    tokio::spawn(async move {
      let report = warmer::warm(&agent).await;
      info!(
        primary = report.primary.stored,
        secondary = report.secondary.stored,
        failed = report.failed(),
        "Background warming finished"
      );

      agent.inner.state.send_if_modified(|state| {
        if *state == LifecycleState::ActiveWarming {
          *state = LifecycleState::ActiveIdle;
          true
        } else {
          false
        }
      });
      report
    })
  }
}
