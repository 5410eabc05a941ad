use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::config::Config;

use super::types::{FetchError, Request, Response, ResponseKind};
use super::Fetcher;

/// reqwest-backed fetcher.
///
/// Responses from `origin` are classified as basic; see `classify_kind`.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
      env!("CARGO_PKG_NAME"),
      "/",
      env!("CARGO_PKG_VERSION")
    ));

    if let Some(secs) = config.request_timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin: config.origin_url()?,
    })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.as_str();

    let method =
      reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| FetchError::Other {
        url: url.to_string(),
        reason: e.to_string(),
      })?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| classify_error(url, e))?;

    let final_url = response.url().clone();
    let status = response.status();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| classify_error(url, e))?;

    let kind = classify_kind(&final_url, &self.origin, &headers);

    Ok(Response {
      redirected: final_url != request.url,
      url: Some(final_url),
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
      kind,
    })
  }
}

/// Same origin is basic; cross-origin is cors when the server opted in with
/// `access-control-allow-origin`, opaque otherwise.
fn classify_kind(url: &Url, origin: &Url, headers: &[(String, String)]) -> ResponseKind {
  if url.origin() == origin.origin() {
    return ResponseKind::Basic;
  }

  let allowed = headers
    .iter()
    .any(|(name, _)| name.eq_ignore_ascii_case("access-control-allow-origin"));
  if allowed {
    ResponseKind::Cors
  } else {
    ResponseKind::Opaque
  }
}

fn classify_error(url: &str, e: reqwest::Error) -> FetchError {
  let url = url.to_string();
  if e.is_timeout() {
    FetchError::Timeout { url }
  } else if e.is_connect() {
    FetchError::Connect {
      url,
      reason: e.to_string(),
    }
  } else if e.is_body() || e.is_decode() {
    FetchError::Aborted {
      url,
      reason: e.to_string(),
    }
  } else {
    FetchError::Other {
      url,
      reason: e.to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn fetcher_for(origin: &str) -> HttpFetcher {
    let config = Config {
      origin: origin.to_string(),
      ..Config::default()
    };
    HttpFetcher::new(&config).unwrap()
  }

  fn image_request(server: &MockServer, p: &str) -> Request {
    Request::get(Url::parse(&format!("{}{}", server.uri(), p)).unwrap())
  }

  #[tokio::test]
  async fn test_same_origin_response_is_basic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/img/a.png"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("content-type", "image/png")
          .set_body_bytes(b"png-bytes".to_vec()),
      )
      .mount(&server)
      .await;

    let fetcher = fetcher_for(&server.uri());
    let response = fetcher
      .fetch(&image_request(&server, "/img/a.png"))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.kind, ResponseKind::Basic);
    assert!(!response.redirected);
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(&response.body[..], b"png-bytes");
    assert!(response.is_cacheable());
  }

  #[tokio::test]
  async fn test_other_origin_response_is_not_basic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/b.gif"))
      .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/shared.gif"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("access-control-allow-origin", "*")
          .set_body_bytes(b"y".to_vec()),
      )
      .mount(&server)
      .await;

    let fetcher = fetcher_for("http://app.invalid/");

    let opaque = fetcher
      .fetch(&image_request(&server, "/b.gif"))
      .await
      .unwrap();
    assert_eq!(opaque.kind, ResponseKind::Opaque);
    assert!(!opaque.is_cacheable());

    let cors = fetcher
      .fetch(&image_request(&server, "/shared.gif"))
      .await
      .unwrap();
    assert_eq!(cors.kind, ResponseKind::Cors);
    assert!(!cors.is_cacheable());
  }

  #[tokio::test]
  async fn test_redirect_is_flagged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/old.png"))
      .respond_with(
        ResponseTemplate::new(302).insert_header("location", format!("{}/new.png", server.uri())),
      )
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/new.png"))
      .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
      .mount(&server)
      .await;

    let fetcher = fetcher_for(&server.uri());
    let response = fetcher
      .fetch(&image_request(&server, "/old.png"))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert!(response.redirected);
    assert!(!response.is_cacheable());
  }

  #[tokio::test]
  async fn test_error_status_is_still_a_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
      .mount(&server)
      .await;

    let fetcher = fetcher_for(&server.uri());
    let response = fetcher
      .fetch(&image_request(&server, "/gone.svg"))
      .await
      .unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_a_fetch_error() {
    // Port 9 (discard) is not expected to be listening locally.
    let fetcher = fetcher_for("http://127.0.0.1:9/");
    let request = Request::get(Url::parse("http://127.0.0.1:9/a.png").unwrap());

    let err = fetcher.fetch(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::Connect { .. }));
  }
}
