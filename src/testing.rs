//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::agent::{Agent, AgentSettings};
use crate::cache::{MemoryStorage, StoreId};
use crate::manifest::{AssetManifest, ManifestEntry, MediaClass};
use crate::net::{FetchError, Fetcher, Request, Response, ResponseKind};

pub const ORIGIN: &str = "http://localhost:5173/";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn url(path: &str) -> Url {
  origin().join(path).unwrap()
}

pub fn manifest(items: &[(&str, MediaClass)]) -> AssetManifest {
  let entries: Vec<ManifestEntry> = items
    .iter()
    .map(|(url, media_class)| ManifestEntry {
      url: url.to_string(),
      priority: 0,
      media_class: *media_class,
    })
    .collect();
  AssetManifest::resolve(&entries, &origin()).unwrap()
}

pub fn agent_with_delay(
  storage: &Arc<MemoryStorage>,
  fetcher: &Arc<FakeFetcher>,
  version: &str,
  manifest: AssetManifest,
  warm_delay: Duration,
) -> Agent<MemoryStorage, FakeFetcher> {
  let settings = AgentSettings {
    store: StoreId::new("img", version),
    origin: origin(),
    manifest,
    warm_delay,
  };
  Agent::new(Arc::clone(storage), Arc::clone(fetcher), settings)
}

/// Agent storing into `img-{version}` with no pause between warming stages.
pub fn agent_with(
  storage: &Arc<MemoryStorage>,
  fetcher: &Arc<FakeFetcher>,
  version: &str,
  manifest: AssetManifest,
) -> Agent<MemoryStorage, FakeFetcher> {
  agent_with_delay(storage, fetcher, version, manifest, Duration::ZERO)
}

/// Installed and activated agent with an empty manifest, warming finished.
pub async fn active_agent(
  storage: &Arc<MemoryStorage>,
  fetcher: &Arc<FakeFetcher>,
) -> Agent<MemoryStorage, FakeFetcher> {
  let agent = agent_with(storage, fetcher, "v1", AssetManifest::default());
  agent.install().await;
  agent.activate().await.await.unwrap();
  agent
}

enum Route {
  Respond(Response, Duration),
  Fail(FetchError),
}

/// In-memory network keyed by URL path. Unknown paths fail to connect.
#[derive(Default)]
pub struct FakeFetcher {
  routes: Mutex<HashMap<String, Route>>,
  calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  fn ok(path: &str, body: &[u8]) -> Response {
    Response {
      url: Some(url(path)),
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("content-type".to_string(), "image/png".to_string())],
      body: Bytes::copy_from_slice(body),
      kind: ResponseKind::Basic,
      redirected: false,
    }
  }

  fn route(self, path: &str, route: Route) -> Self {
    self.routes.lock().unwrap().insert(path.to_string(), route);
    self
  }

  pub fn serve(self, path: &str, body: &[u8]) -> Self {
    let response = Self::ok(path, body);
    self.route(path, Route::Respond(response, Duration::ZERO))
  }

  pub fn serve_after(self, path: &str, body: &[u8], delay: Duration) -> Self {
    let response = Self::ok(path, body);
    self.route(path, Route::Respond(response, delay))
  }

  pub fn status(self, path: &str, status: u16) -> Self {
    let mut response = Self::ok(path, b"error page");
    response.status = status;
    response.status_text = String::new();
    self.route(path, Route::Respond(response, Duration::ZERO))
  }

  /// Serve a 200 adjusted by `adjust`.
  pub fn respond(self, path: &str, adjust: impl FnOnce(&mut Response)) -> Self {
    let mut response = Self::ok(path, b"body");
    adjust(&mut response);
    self.route(path, Route::Respond(response, Duration::ZERO))
  }

  pub fn fail(self, path: &str, error: FetchError) -> Self {
    self.route(path, Route::Fail(error))
  }

  /// Change what an already shared fetcher serves.
  pub fn replace(&self, path: &str, body: &[u8]) {
    self.routes.lock().unwrap().insert(
      path.to_string(),
      Route::Respond(Self::ok(path, body), Duration::ZERO),
    );
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);

    let outcome = {
      let routes = self.routes.lock().unwrap();
      match routes.get(request.url.path()) {
        Some(Route::Respond(response, delay)) => Ok((response.clone(), *delay)),
        Some(Route::Fail(error)) => Err(error.clone()),
        None => Err(FetchError::Connect {
          url: request.url.to_string(),
          reason: "connection refused".to_string(),
        }),
      }
    };

    let (response, delay) = outcome?;
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    Ok(response)
  }
}
