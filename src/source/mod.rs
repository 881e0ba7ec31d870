//! One abstraction over the two ways execution state reaches the monitor.
//!
//! Push (the progress stream) and pull (snapshot polling) end up feeding the
//! same registry machinery, so both are expressed as an
//! `ExecutionStatusSource` producing a stream of `SourceEvent`s. The registry
//! and aggregator never know which transport is underneath.

use crate::channel::{frame_payload, PushTransport};
use crate::client::{ApiError, ExecutionApi};
use crate::model::{ExecutionDetail, StreamEvent};
use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// One observation from a status source.
#[derive(Debug)]
pub enum SourceEvent {
    /// A parsed progress event from the push channel.
    Progress(StreamEvent),
    /// A full snapshot from the pull endpoint. Always replaces, never merges.
    Snapshot(ExecutionDetail),
    /// The source died before the execution reached a terminal state.
    /// Reported exactly once; the source never retries on its own.
    Lost(String),
    /// The source closed normally after observing a terminal event/status.
    Ended,
}

pub type SourceStream = Pin<Box<dyn Stream<Item = SourceEvent> + Send>>;

/// Source-agnostic seam consumed by the registry and the poller.
#[async_trait]
pub trait ExecutionStatusSource: Send + Sync {
    async fn subscribe(&self, execution_id: i64) -> SourceStream;
}

/// Push-based source: parses raw channel frames into progress events.
///
/// Malformed payloads are dropped silently (the channel stays healthy); a
/// terminal event is delivered and then the stream ends even if more bytes
/// arrive; EOF or a read error before a terminal event surfaces as `Lost`.
pub struct StreamingSource {
    transport: Arc<dyn PushTransport>,
}

impl StreamingSource {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ExecutionStatusSource for StreamingSource {
    async fn subscribe(&self, execution_id: i64) -> SourceStream {
        let transport = Arc::clone(&self.transport);
        Box::pin(stream! {
            let mut frames = match transport.open(execution_id).await {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(execution = %execution_id, error = %e, "failed to open progress stream");
                    yield SourceEvent::Lost(e.to_string());
                    return;
                }
            };

            loop {
                match frames.next().await {
                    Some(Ok(frame)) => {
                        let Some(payload) = frame_payload(&frame) else {
                            continue;
                        };
                        match StreamEvent::parse(payload) {
                            Ok(event) => {
                                let terminal = event.kind.is_terminal();
                                yield SourceEvent::Progress(event);
                                if terminal {
                                    // Channel closes itself on the terminal
                                    // event; trailing bytes are never read.
                                    yield SourceEvent::Ended;
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(execution = %execution_id, error = %e,
                                       "dropping malformed stream event");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        yield SourceEvent::Lost(e.to_string());
                        break;
                    }
                    None => {
                        yield SourceEvent::Lost(
                            "stream closed before terminal event".to_string(),
                        );
                        break;
                    }
                }
            }
        })
    }
}

/// Fetch seam for the pull path, so tests can script snapshot sequences.
#[async_trait]
pub trait SnapshotFetch: Send + Sync {
    async fn fetch(&self, execution_id: i64) -> Result<ExecutionDetail, ApiError>;
}

#[async_trait]
impl SnapshotFetch for ExecutionApi {
    async fn fetch(&self, execution_id: i64) -> Result<ExecutionDetail, ApiError> {
        self.get_execution(execution_id).await
    }
}

/// Pull-based source: an immediate fetch, then one fetch per interval tick
/// while the last observed status is non-terminal.
///
/// Fetches never overlap -- each is awaited inline and missed ticks are
/// skipped rather than bursted. A failed fetch is logged and the loop keeps
/// its schedule; only a terminal status ends the stream.
pub struct PollingSource {
    fetch: Arc<dyn SnapshotFetch>,
    interval: Duration,
}

impl PollingSource {
    pub fn new(fetch: Arc<dyn SnapshotFetch>, interval: Duration) -> Self {
        Self { fetch, interval }
    }
}

#[async_trait]
impl ExecutionStatusSource for PollingSource {
    async fn subscribe(&self, execution_id: i64) -> SourceStream {
        let fetch = Arc::clone(&self.fetch);
        let interval = self.interval;
        Box::pin(stream! {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match fetch.fetch(execution_id).await {
                    Ok(detail) => {
                        let terminal = detail.status.is_terminal();
                        yield SourceEvent::Snapshot(detail);
                        if terminal {
                            yield SourceEvent::Ended;
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(execution = %execution_id, error = %e,
                              "snapshot fetch failed, keeping poll schedule");
                    }
                }
            }
        })
    }
}
