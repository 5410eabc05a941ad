//! Fetch-and-store of a list of URLs as one unit.

use futures::{stream, StreamExt};
use tracing::debug;
use url::Url;

use crate::cache::{CacheStorage, CacheStore};
use crate::net::{Fetcher, Request};

/// Requests in flight at once for a single batch.
const MAX_IN_FLIGHT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
  pub url: Url,
  pub reason: String,
}

/// A batch in which at least one item could not be fetched or stored.
///
/// Items that did succeed stay in the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
  "{} of {} resources failed{}",
  .failures.len(),
  .stored + .failures.len(),
  first_failure(.failures)
)]
pub struct BatchError {
  pub stored: usize,
  pub failures: Vec<BatchFailure>,
}

fn first_failure(failures: &[BatchFailure]) -> String {
  failures
    .first()
    .map(|f| format!(" ({}: {})", f.url, f.reason))
    .unwrap_or_default()
}

/// Fetch every URL and store each one that comes back with a 2xx status.
///
/// Stored entries are kept even when other items fail; there is no rollback.
/// Returns the number of entries stored.
pub(crate) async fn add_all<S, F>(
  store: &CacheStore<S>,
  fetcher: &F,
  urls: &[Url],
) -> Result<usize, BatchError>
where
  S: CacheStorage,
  F: Fetcher,
{
  let outcomes: Vec<Result<(), BatchFailure>> = stream::iter(urls.iter().cloned())
    .map(|url| fetch_and_store(store, fetcher, url))
    .buffer_unordered(MAX_IN_FLIGHT)
    .collect()
    .await;

  let mut stored = 0;
  let mut failures = Vec::new();
  for outcome in outcomes {
    match outcome {
      Ok(()) => stored += 1,
      Err(failure) => failures.push(failure),
    }
  }

  if failures.is_empty() {
    Ok(stored)
  } else {
    Err(BatchError { stored, failures })
  }
}

async fn fetch_and_store<S, F>(
  store: &CacheStore<S>,
  fetcher: &F,
  url: Url,
) -> Result<(), BatchFailure>
where
  S: CacheStorage,
  F: Fetcher,
{
  let request = Request::get(url);
  let fail = |reason: String| BatchFailure {
    url: request.url.clone(),
    reason,
  };

  let response = fetcher
    .fetch(&request)
    .await
    .map_err(|e| fail(e.to_string()))?;

  if !response.is_ok() {
    return Err(fail(format!("unexpected status {}", response.status)));
  }

  store
    .put(&request.key(), &response.into_entry())
    .map_err(|e| fail(e.to_string()))?;

  debug!(url = %request.url, store = store.name(), "Stored batch item");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, StoreId};
  use crate::testing::{url, FakeFetcher};
  use std::sync::Arc;

  fn open_store() -> CacheStore<MemoryStorage> {
    CacheStore::open(Arc::new(MemoryStorage::new()), &StoreId::new("img", "v1")).unwrap()
  }

  #[tokio::test]
  async fn test_all_items_stored() {
    let store = open_store();
    let fetcher = FakeFetcher::new()
      .serve("/a.png", b"a")
      .serve("/b.png", b"b");

    let stored = add_all(&store, &fetcher, &[url("/a.png"), url("/b.png")])
      .await
      .unwrap();

    assert_eq!(stored, 2);
    assert_eq!(store.keys().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_partial_failure_keeps_successes() {
    let store = open_store();
    let fetcher = FakeFetcher::new()
      .serve("/a.png", b"a")
      .status("/b.png", 500);

    let err = add_all(
      &store,
      &fetcher,
      &[url("/a.png"), url("/b.png"), url("/offline.png")],
    )
    .await
    .unwrap_err();

    assert_eq!(err.stored, 1);
    assert_eq!(err.failures.len(), 2);
    assert!(err.to_string().starts_with("2 of 3 resources failed ("));

    let keys = store.keys().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].url(), url("/a.png").as_str());
  }

  #[tokio::test]
  async fn test_empty_batch_succeeds() {
    let store = open_store();
    let fetcher = FakeFetcher::new();
    assert_eq!(add_all(&store, &fetcher, &[]).await.unwrap(), 0);
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_missing_store_fails_every_item() {
    let storage = Arc::new(MemoryStorage::new());
    let store = CacheStore::handle(storage, &StoreId::new("img", "v1"));
    let fetcher = FakeFetcher::new().serve("/a.png", b"a");

    let err = add_all(&store, &fetcher, &[url("/a.png")]).await.unwrap_err();
    assert_eq!(err.stored, 0);
    assert!(err.failures[0].reason.contains("does not exist"));
  }
}
