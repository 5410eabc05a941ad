//! Cache-first handling of outbound media requests.

use tracing::{debug, warn};

use super::Agent;
use crate::cache::{CacheResult, CacheStorage};
use crate::net::{Destination, FetchError, Fetcher, Request, Response};

/// URL fragments that mark a request as media regardless of destination.
const MEDIA_SUFFIXES: [&str; 5] = [".png", ".gif", ".svg", ".jpg", ".jpeg"];

/// What the host should do with a request after the agent has seen it.
#[derive(Debug)]
pub enum Interception {
  /// Not ours; send the request as if the agent did not exist.
  Passthrough(Request),
  /// The agent produced the response.
  Respond(CacheResult<Response>),
}

/// Image destination, or a URL containing one of the media suffixes.
///
/// Plain case-sensitive substring match, so `/a.png?v=2` counts and
/// `/A.PNG` does not.
pub fn is_cacheable_media(request: &Request) -> bool {
  if request.destination == Destination::Image {
    return true;
  }
  let url = request.url.as_str();
  MEDIA_SUFFIXES.iter().any(|suffix| url.contains(suffix))
}

impl<S, F> Agent<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  /// Decide how to answer one request.
  ///
  /// Media requests always resolve to some response: the cached entry, the
  /// network response, or a 404 placeholder when the network is unreachable.
  /// Everything else, and everything before activation, passes through.
  pub async fn intercept(&self, request: Request) -> Interception {
    if !is_cacheable_media(&request) || !self.is_controlling() {
      return Interception::Passthrough(request);
    }

    let store = self.store();
    let key = request.key();

    // Check cache first
    match store.get(&key) {
      Ok(Some(entry)) => {
        debug!(%key, "Cache hit");
        let cached_at = entry.cached_at;
        return Interception::Respond(CacheResult::from_cache(
          Response::from_entry(&request.url, entry),
          cached_at,
        ));
      }
      Ok(None) => debug!(%key, "Cache miss"),
      Err(e) => warn!(%key, error = %e, "Cache lookup failed; treating as miss"),
    }

    let response = match self.inner.fetcher.fetch(&request).await {
      Ok(response) => response,
      Err(e) => {
        debug!(%key, error = %e, "Network unavailable; serving placeholder");
        return Interception::Respond(CacheResult::placeholder(Response::not_available()));
      }
    };

    if !response.is_cacheable() {
      debug!(
        %key,
        status = response.status,
        kind = ?response.kind,
        redirected = response.redirected,
        "Response not cacheable"
      );
      return Interception::Respond(CacheResult::uncached(response));
    }

    // The caller keeps the original; the store gets its own copy.
    let entry = response.duplicate().into_entry();
    let agent = self.clone();
    self.inner.writes.start();
    tokio::spawn(async move {
      if let Err(e) = agent.store().put(&key, &entry) {
        warn!(%key, error = %e, "Write-through failed");
      }
      agent.inner.writes.finish();
    });

    Interception::Respond(CacheResult::from_network(response))
  }

  /// Intercept, then perform passthrough requests directly.
  ///
  /// Only passthrough requests can fail; intercepted media never does.
  pub async fn handle(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    match self.intercept(request).await {
      Interception::Respond(result) => Ok(result),
      Interception::Passthrough(request) => self
        .inner
        .fetcher
        .fetch(&request)
        .await
        .map(CacheResult::uncached),
    }
  }
}
