use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::cache::{CachedEntry, RequestKey};

/// Headers worth keeping when a response is written to the store.
const STORED_HEADERS: [&str; 5] = [
  "content-type",
  "content-length",
  "etag",
  "last-modified",
  "cache-control",
];

/// What the host application intends to do with a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Destination {
  Image,
  Document,
  Script,
  Style,
  Font,
  #[default]
  Empty,
  Other,
}

impl FromStr for Destination {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "image" => Ok(Self::Image),
      "document" => Ok(Self::Document),
      "script" => Ok(Self::Script),
      "style" => Ok(Self::Style),
      "font" => Ok(Self::Font),
      "" | "empty" => Ok(Self::Empty),
      "other" => Ok(Self::Other),
      other => Err(format!("unknown request destination '{}'", other)),
    }
  }
}

/// An outbound request issued by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub destination: Destination,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      destination: Destination::Empty,
    }
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  /// Identity of this request in the cache store.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// How a response relates to the origin the agent serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin response with a readable body
  Basic,
  /// Cross-origin response the host is allowed to read
  Cors,
  /// Cross-origin response whose contents are hidden
  Opaque,
  /// Synthesized by the agent
  Synthetic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  /// Final URL after redirects; None for synthesized responses
  pub url: Option<Url>,
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub kind: ResponseKind,
  pub redirected: bool,
}

impl Response {
  /// Placeholder returned when an image could not be fetched at all.
  pub fn not_available() -> Self {
    Self {
      url: None,
      status: 404,
      status_text: "Not Found".to_string(),
      headers: vec![(
        "content-type".to_string(),
        "text/plain;charset=UTF-8".to_string(),
      )],
      body: Bytes::from_static(b"Image not available"),
      kind: ResponseKind::Synthetic,
      redirected: false,
    }
  }

  /// Rebuild a response from a stored entry.
  pub fn from_entry(url: &Url, entry: CachedEntry) -> Self {
    Self {
      url: Some(url.clone()),
      status: entry.status,
      status_text: entry.status_text,
      headers: entry.headers,
      body: entry.body,
      kind: ResponseKind::Basic,
      redirected: false,
    }
  }

  /// Any 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Whether this response may be written to the store on a cache miss.
  ///
  /// Only plain same-origin 200s qualify; error pages, opaque cross-origin
  /// bodies and redirect targets are handed back without caching.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
  }

  /// An independent copy for a second consumer.
  pub fn duplicate(&self) -> Self {
    Self {
      body: Bytes::copy_from_slice(&self.body),
      ..self.clone()
    }
  }

  /// Convert into the form kept in the store.
  pub fn into_entry(self) -> CachedEntry {
    let headers = self
      .headers
      .into_iter()
      .filter(|(name, _)| STORED_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
      .collect();

    CachedEntry::new(self.status, self.status_text, headers, self.body)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A fetch that produced no response at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
  #[error("request to {url} timed out")]
  Timeout { url: String },
  #[error("could not connect for {url}: {reason}")]
  Connect { url: String, reason: String },
  #[error("response from {url} was cut off: {reason}")]
  Aborted { url: String, reason: String },
  #[error("request to {url} failed: {reason}")]
  Other { url: String, reason: String },
}

impl fmt::Display for Request {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ok_response() -> Response {
    Response {
      url: Some(Url::parse("http://localhost/a.png").unwrap()),
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![
        ("Content-Type".to_string(), "image/png".to_string()),
        ("Set-Cookie".to_string(), "session=1".to_string()),
      ],
      body: Bytes::from_static(b"\x89PNG"),
      kind: ResponseKind::Basic,
      redirected: false,
    }
  }

  #[test]
  fn test_plain_200_is_cacheable() {
    assert!(ok_response().is_cacheable());
  }

  #[test]
  fn test_error_status_is_not_cacheable() {
    let response = Response {
      status: 500,
      ..ok_response()
    };
    assert!(!response.is_cacheable());

    let partial = Response {
      status: 206,
      ..ok_response()
    };
    assert!(partial.is_ok());
    assert!(!partial.is_cacheable());
  }

  #[test]
  fn test_cross_origin_and_redirects_are_not_cacheable() {
    for kind in [ResponseKind::Cors, ResponseKind::Opaque] {
      let response = Response {
        kind,
        ..ok_response()
      };
      assert!(!response.is_cacheable());
    }

    let redirected = Response {
      redirected: true,
      ..ok_response()
    };
    assert!(!redirected.is_cacheable());
  }

  #[test]
  fn test_duplicate_is_independently_readable() {
    let original = ok_response();
    let copy = original.duplicate();

    let a: Vec<u8> = original.body.into_iter().collect();
    let b: Vec<u8> = copy.body.into_iter().collect();
    assert_eq!(a, b"\x89PNG");
    assert_eq!(a, b);
  }

  #[test]
  fn test_into_entry_keeps_header_subset() {
    let entry = ok_response().into_entry();
    assert_eq!(
      entry.headers,
      vec![("Content-Type".to_string(), "image/png".to_string())]
    );
    assert_eq!(entry.status, 200);
  }

  #[test]
  fn test_placeholder_has_body() {
    let response = Response::not_available();
    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert_eq!(&response.body[..], b"Image not available");
  }

  #[test]
  fn test_destination_parsing() {
    assert_eq!("image".parse::<Destination>(), Ok(Destination::Image));
    assert_eq!("IMAGE".parse::<Destination>(), Ok(Destination::Image));
    assert_eq!("".parse::<Destination>(), Ok(Destination::Empty));
    assert!("video".parse::<Destination>().is_err());
  }
}
