//! Relay daemon standing in for the browser's background context.
//!
//! Contexts connect over a Unix socket and speak JSON lines:
//!
//! ```text
//! client -> {"hello":{"context":"content"}}
//! relay  -> {"welcome":{"peer":"<uuid>"}}
//! client -> {"type":"ZOOM_CHANGE","payload":{"zoom":2},"timestamp":..,"source":{..},"target":{..}}
//! relay  -> (the same message, on every other peer whose context is in target)
//! client -> "stop"
//! relay  -> "stopping"
//! ```

pub mod client;
pub mod paths;
pub mod server;

use anyhow::{Context, Result};
use plumbline_core::context::ContextKind;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

pub use client::RelayClient;
pub use server::RelayServer;

/// Largest accepted line (1 MB).
pub(crate) const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Control frames sent by a context to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    /// Must be the first line of every connection that wants messages.
    Hello { context: ContextKind },
    /// Ask the relay to shut down. Accepted with or without a hello.
    Stop,
}

/// Relay replies to control frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Welcome { peer: String },
    Stopping,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },
}

impl Reply {
    pub fn error(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Reply::Error {
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Read one line, refusing to buffer more than `max_size` bytes.
///
/// Returns the bytes consumed; 0 means EOF. UTF-8 is validated once the
/// whole line is in, so multi-byte characters split across reads are fine.
pub(crate) async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_size: usize,
) -> Result<usize> {
    let mut total = 0;
    let mut bytes = Vec::new();

    loop {
        let available = reader.fill_buf().await.context("Failed to read from socket")?;
        if available.is_empty() {
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let take = newline_pos.map_or(available.len(), |p| p + 1);

        if total + take > max_size {
            anyhow::bail!("Line too large: exceeded {} byte limit", max_size);
        }

        bytes.extend_from_slice(&available[..take]);
        total += take;
        reader.consume(take);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 on socket")?;
    buf.push_str(line);
    Ok(total)
}

/// Write `value` as one JSON line and flush.
pub(crate) async fn write_json_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value).context("Failed to serialize frame")?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write frame")?;
    writer.flush().await.context("Failed to flush")?;
    Ok(())
}

/// Write queued lines to `writer` until every sender is dropped.
pub(crate) async fn pump_lines<W: AsyncWrite + Unpin>(mut writer: W, mut lines: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("Failed to write line: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!("Failed to flush line: {}", e);
            break;
        }
    }
}
