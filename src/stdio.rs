//! Line-delimited JSON transport for the control channel.
//!
//! One `ControlMessage` per input line; each reply is written as one output
//! line as soon as it is ready, so replies may come back out of order.

use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent::{ControlClient, ControlMessage};

/// Serve control messages from `input` until it reaches EOF.
///
/// Waits for every outstanding reply before returning the writer.
pub async fn serve_lines<R, W>(client: ControlClient, input: R, output: W) -> Result<W>
where
  R: AsyncBufRead + Unpin,
  W: AsyncWrite + Unpin + Send + 'static,
{
  let (tx, mut rx) = mpsc::unbounded_channel::<String>();

  // Single writer so reply lines never interleave
  let writer = tokio::spawn(async move {
    let mut output = output;
    while let Some(line) = rx.recv().await {
      output.write_all(line.as_bytes()).await?;
      output.write_all(b"\n").await?;
      output.flush().await?;
    }
    Ok::<W, std::io::Error>(output)
  });

  let mut lines = input.lines();
  let mut pending = JoinSet::new();

  while let Some(line) = lines
    .next_line()
    .await
    .map_err(|e| eyre!("Failed to read control input: {}", e))?
  {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }

    let message: ControlMessage = match serde_json::from_str(line) {
      Ok(message) => message,
      Err(e) => {
        warn!(error = %e, "Skipping malformed control message");
        continue;
      }
    };

    let client = client.clone();
    let tx = tx.clone();
    pending.spawn(async move {
      match client.send(message).await {
        Ok(Some(reply)) => match serde_json::to_string(&reply) {
          Ok(json) => {
            if tx.send(json).is_err() {
              debug!("Reply writer has stopped");
            }
          }
          Err(e) => warn!(error = %e, "Failed to encode control reply"),
        },
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Control request failed"),
      }
    });
  }

  while pending.join_next().await.is_some() {}
  drop(tx);

  writer
    .await
    .map_err(|e| eyre!("Reply writer panicked: {}", e))?
    .map_err(|e| eyre!("Failed to write control reply: {}", e))
}
