//! Pull-based snapshot cache, for list/detail surfaces that were not opened
//! via the live channel and as the post-completion source of truth.
//!
//! One poll loop per execution id, each fetch fully replacing the cached
//! snapshot. The loop stops itself on the first terminal status and never
//! restarts unless `start` is called again.

use crate::model::{ExecutionDetail, ExecutionStatus};
use crate::source::{ExecutionStatusSource, PollingSource, SnapshotFetch, SourceEvent};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Status observation pushed to poller subscribers on every stored fetch.
#[derive(Debug, Clone)]
pub struct PollerUpdate {
    pub execution_id: i64,
    pub status: ExecutionStatus,
}

#[derive(Default)]
struct PollEntry {
    latest: Option<ExecutionDetail>,
    task: Option<JoinHandle<()>>,
}

struct PollerInner {
    fetch: Arc<dyn SnapshotFetch>,
    entries: Mutex<HashMap<i64, PollEntry>>,
    updates: broadcast::Sender<PollerUpdate>,
}

/// Keyed snapshot poller. Clones share the cache and the running loops.
#[derive(Clone)]
pub struct SnapshotPoller {
    inner: Arc<PollerInner>,
}

impl SnapshotPoller {
    pub fn new(fetch: Arc<dyn SnapshotFetch>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(PollerInner {
                fetch,
                entries: Mutex::new(HashMap::new()),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PollerUpdate> {
        self.inner.updates.subscribe()
    }

    /// Begin polling `execution_id` every `interval` (first fetch happens
    /// immediately). No-op if a loop is already live for this id.
    pub fn start(&self, execution_id: i64, interval: Duration) {
        let mut entries = self.inner.entries.lock().unwrap();
        let entry = entries.entry(execution_id).or_default();
        if let Some(task) = &entry.task {
            if !task.is_finished() {
                debug!(execution = %execution_id, "poll loop already running");
                return;
            }
        }

        let interval_ms = interval.as_millis() as u64;
        info!(execution = %execution_id, %interval_ms, "starting poll loop");
        entry.task = Some(tokio::spawn(poll_loop(
            Arc::clone(&self.inner),
            execution_id,
            interval,
        )));
    }

    /// Stop the poll loop for `execution_id`, keeping its cached snapshot.
    /// Idempotent; unknown ids are a no-op.
    pub fn stop(&self, execution_id: i64) {
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(&execution_id) {
            if let Some(task) = entry.task.take() {
                task.abort();
                info!(execution = %execution_id, "poll loop stopped");
            }
        }
    }

    pub fn is_polling(&self, execution_id: i64) -> bool {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(&execution_id)
            .and_then(|entry| entry.task.as_ref())
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Last stored snapshot for `execution_id`, live or not.
    pub fn latest(&self, execution_id: i64) -> Option<ExecutionDetail> {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(&execution_id)
            .and_then(|entry| entry.latest.clone())
    }
}

async fn poll_loop(inner: Arc<PollerInner>, execution_id: i64, interval: Duration) {
    let source = PollingSource::new(Arc::clone(&inner.fetch), interval);
    let mut stream = source.subscribe(execution_id).await;

    while let Some(event) = stream.next().await {
        match event {
            SourceEvent::Snapshot(detail) => {
                let status = detail.status;
                {
                    let mut entries = inner.entries.lock().unwrap();
                    entries.entry(execution_id).or_default().latest = Some(detail);
                }
                let _ = inner.updates.send(PollerUpdate {
                    execution_id,
                    status,
                });
            }
            SourceEvent::Ended => break,
            // The pull source never emits streaming-only variants.
            SourceEvent::Progress(_) | SourceEvent::Lost(_) => {}
        }
    }

    debug!(execution = %execution_id, "poll loop ended on terminal status");
    let mut entries = inner.entries.lock().unwrap();
    if let Some(entry) = entries.get_mut(&execution_id) {
        entry.task = None;
    }
}
