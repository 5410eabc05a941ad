//! Staged background population of the store after activation.

use tracing::debug;

use super::batch::add_all;
use super::Agent;
use crate::cache::{CacheStorage, CacheStore};
use crate::manifest::MediaClass;
use crate::net::Fetcher;

/// Outcome of one warming stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
  pub stored: usize,
  pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
  pub primary: StageReport,
  pub secondary: StageReport,
}

impl WarmReport {
  pub fn failed(&self) -> usize {
    self.primary.failed + self.secondary.failed
  }
}

/// Run both stages once. Never fails; problems end up in the report.
///
/// Stage two starts `warm_delay` after stage one has finished. Writes go to
/// the existing store only; if it has been swept, items fail.
pub(crate) async fn warm<S, F>(agent: &Agent<S, F>) -> WarmReport
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let store = agent.store();

  let primary = run_stage(agent, &store, MediaClass::BulkPrimary).await;

  tokio::time::sleep(agent.inner.settings.warm_delay).await;

  let secondary = run_stage(agent, &store, MediaClass::BulkSecondary).await;

  WarmReport { primary, secondary }
}

async fn run_stage<S, F>(agent: &Agent<S, F>, store: &CacheStore<S>, class: MediaClass) -> StageReport
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  let urls = agent.inner.settings.manifest.urls(class);

  match add_all(store, agent.inner.fetcher.as_ref(), &urls).await {
    Ok(stored) => {
      debug!(?class, stored, "Warming stage complete");
      StageReport { stored, failed: 0 }
    }
    Err(e) => {
      debug!(?class, error = %e, "Warming stage incomplete");
      StageReport {
        stored: e.stored,
        failed: e.failures.len(),
      }
    }
  }
}
