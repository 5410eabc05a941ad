//! Network side of the agent: request/response types and the fetch seam.

mod client;
mod types;

pub use client::HttpFetcher;
pub use types::{Destination, FetchError, Request, Response, ResponseKind};

use async_trait::async_trait;

/// Anything that can turn a request into a network response.
///
/// `Err` means no response arrived at all (offline, DNS, reset, timeout).
/// HTTP error statuses are still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}
