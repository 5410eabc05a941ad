//! Out-of-band request/reply protocol between the host and the agent.
//!
//! Every request travels with its own one-shot reply sender; the agent
//! answers on that sender exactly once and nowhere else.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use super::batch::add_all;
use super::Agent;
use crate::cache::CacheStorage;
use crate::net::Fetcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  #[serde(alias = "CACHE_STATUS")]
  StatusQuery,
  #[serde(alias = "CACHE_STATUS_RESPONSE", rename_all = "camelCase")]
  StatusReply {
    cached_count: usize,
    cached_urls: Vec<String>,
  },
  #[serde(alias = "PRELOAD_IMAGES")]
  PreloadRequest {
    #[serde(default)]
    urls: Vec<String>,
  },
  PreloadComplete {
    count: usize,
  },
  PreloadError {
    error: String,
  },
}

/// A control message plus the channel its reply must go to.
#[derive(Debug)]
pub struct ControlRequest {
  pub message: ControlMessage,
  pub reply: oneshot::Sender<ControlMessage>,
}

/// Host-side handle for sending control messages to a running agent.
#[derive(Clone)]
pub struct ControlClient {
  tx: mpsc::UnboundedSender<ControlRequest>,
}

impl ControlClient {
  /// Send a message and wait for its reply.
  ///
  /// Returns `None` when the message calls for no reply.
  pub async fn send(&self, message: ControlMessage) -> Result<Option<ControlMessage>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(ControlRequest { message, reply })
      .map_err(|_| eyre!("Agent control channel is closed"))?;

    // A dropped sender means the agent chose not to answer.
    Ok(rx.await.ok())
  }

  pub async fn status(&self) -> Result<ControlMessage> {
    self
      .send(ControlMessage::StatusQuery)
      .await?
      .ok_or_else(|| eyre!("Agent did not answer the status query"))
  }

  pub async fn preload(&self, urls: Vec<String>) -> Result<ControlMessage> {
    self
      .send(ControlMessage::PreloadRequest { urls })
      .await?
      .ok_or_else(|| eyre!("Agent did not answer the preload request"))
  }
}

impl<S, F> Agent<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  /// Start serving control requests. Each request is handled in its own task.
  ///
  /// The listener stops once every client clone has been dropped.
  pub fn spawn_control(&self) -> ControlClient {
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlRequest>();
    let agent = self.clone();

    tokio::spawn(async move {
      while let Some(request) = rx.recv().await {
        let agent = agent.clone();
        tokio::spawn(async move {
          let ControlRequest { message, reply } = request;
          if let Some(answer) = agent.respond(message).await {
            if reply.send(answer).is_err() {
              debug!("Control reply dropped; sender went away");
            }
          }
        });
      }
    });

    ControlClient { tx }
  }

  /// Compute the reply for one control message.
  pub async fn respond(&self, message: ControlMessage) -> Option<ControlMessage> {
    match message {
      ControlMessage::StatusQuery => Some(self.status_reply()),
      ControlMessage::PreloadRequest { urls } => Some(self.preload(urls).await),
      other => {
        debug!(?other, "Ignoring control message that is not a request");
        None
      }
    }
  }

  fn status_reply(&self) -> ControlMessage {
    let keys = self.store().keys().unwrap_or_else(|e| {
      warn!(error = %e, "Could not list cache entries");
      Vec::new()
    });

    ControlMessage::StatusReply {
      cached_count: keys.len(),
      cached_urls: keys.into_iter().map(|k| k.url().to_string()).collect(),
    }
  }

  async fn preload(&self, urls: Vec<String>) -> ControlMessage {
    match self.preload_batch(&urls).await {
      Ok(()) => {
        info!(count = urls.len(), "Preload complete");
        ControlMessage::PreloadComplete { count: urls.len() }
      }
      Err(e) => {
        warn!(error = %e, "Preload failed");
        ControlMessage::PreloadError {
          error: e.to_string(),
        }
      }
    }
  }

  async fn preload_batch(&self, urls: &[String]) -> Result<()> {
    let resolved = urls
      .iter()
      .map(|u| self.resolve(u))
      .collect::<Result<Vec<Url>>>()?;

    // Never creates the store; a swept version rejects the writes.
    add_all(&self.store(), self.inner.fetcher.as_ref(), &resolved).await?;
    Ok(())
  }
}
