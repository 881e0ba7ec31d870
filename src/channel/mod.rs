//! Push channel to one execution's progress stream.
//!
//! The service exposes `GET /execute/{id}/stream`, a persistent connection
//! carrying one JSON event per line (plain ND-JSON or SSE `data:` framing --
//! both are accepted). This module only deals in raw text frames; parsing
//! frames into events and terminal detection live in the status source layer.

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("stream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("execution service returned HTTP {0} for the progress stream")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Ordered raw frames from one channel. The stream ends when the connection
/// closes; an `Err` item means the transport died mid-read.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// Server-push transport seam. One implementation speaks HTTP streaming;
/// tests substitute scripted transports.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a one-way channel to `execution_id`. At most one live channel
    /// per id is the registry's job, not the transport's.
    async fn open(&self, execution_id: i64) -> Result<FrameStream, ChannelError>;
}

/// HTTP streaming transport over reqwest.
pub struct HttpStreamTransport {
    client: Client,
    base_url: String,
}

impl HttpStreamTransport {
    /// Note: the client carries a connect timeout only. An overall request
    /// timeout would tear down long-running streams that are still healthy.
    pub fn new(base_url: &str) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PushTransport for HttpStreamTransport {
    async fn open(&self, execution_id: i64) -> Result<FrameStream, ChannelError> {
        let url = format!("{}/execute/{}/stream", self.base_url, execution_id);
        tracing::debug!(execution = %execution_id, %url, "opening progress stream");

        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ChannelError::Status(resp.status().as_u16()));
        }

        let bytes = resp
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new());
        let frames = lines.map(|item| item.map_err(|e| ChannelError::Transport(e.to_string())));
        Ok(Box::pin(frames))
    }
}

/// Extract the JSON payload from one raw frame, if it carries one.
///
/// Accepts SSE `data:`-framed lines and bare JSON lines. Blank lines, SSE
/// comments (`:`) and non-data SSE fields (`event:`, `id:`, `retry:`) carry
/// no payload.
pub fn frame_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return Some(rest.trim_start());
    }
    if line.starts_with('{') {
        return Some(line);
    }
    None
}
