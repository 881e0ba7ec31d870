//! Tracks every execution being monitored right now, plus a finished index
//! so surfaces can re-display a timeline after its channel closed.
//!
//! Coordination rules: at most one live channel per execution id, independent
//! ids never block each other (per-binding locks only), and once a binding is
//! closed no further mutation of its aggregator can happen.

use crate::model::ExecutionDetail;
use crate::source::{ExecutionStatusSource, SourceEvent};
use crate::timeline::{TimelineAggregator, TimelineSnapshot, TimelineStep};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notification pushed to observers (status badges, history views, the CLI
/// watch loop) whenever a monitored execution changes.
#[derive(Debug, Clone)]
pub enum MonitorUpdate {
    /// A new timeline step arrived over the push channel.
    Step {
        execution_id: i64,
        step: TimelineStep,
    },
    /// The pull path replaced the cached snapshot for this execution.
    SnapshotRefreshed { execution_id: i64 },
    /// The execution reached a terminal state and its binding was demoted to
    /// the finished index. Sent exactly once per binding.
    Completed { execution_id: i64 },
    /// The channel died before a terminal event. Sent exactly once; the
    /// timeline is preserved as-is and recovery requires a fresh
    /// `start_monitoring` call.
    ConnectionLost { execution_id: i64, reason: String },
}

#[derive(Default)]
struct MonitorState {
    aggregator: TimelineAggregator,
    latest_detail: Option<ExecutionDetail>,
    /// Set under this same lock by `stop_monitoring`; the driver checks it
    /// before every mutation, so a closed binding can never gain steps.
    closed: bool,
}

/// Caller-facing view of one monitored execution. Cheap to clone; all clones
/// observe the same aggregator.
#[derive(Clone)]
pub struct MonitorHandle {
    execution_id: i64,
    state: Arc<Mutex<MonitorState>>,
}

impl MonitorHandle {
    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        self.state.lock().unwrap().aggregator.snapshot()
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().aggregator.is_complete()
    }

    pub fn latest_detail(&self) -> Option<ExecutionDetail> {
        self.state.lock().unwrap().latest_detail.clone()
    }

    /// True when both handles observe the same underlying binding.
    pub fn same_binding(&self, other: &MonitorHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

struct ActiveBinding {
    state: Arc<Mutex<MonitorState>>,
    runbook_id: Option<i64>,
    task: JoinHandle<()>,
}

struct FinishedEntry {
    snapshot: TimelineSnapshot,
    detail: Option<ExecutionDetail>,
}

#[derive(Default)]
struct Bindings {
    active: HashMap<i64, ActiveBinding>,
    finished: HashMap<i64, FinishedEntry>,
    /// Originating runbook -> most recently *completed* execution, so "view
    /// timeline again" and report surfaces can re-find results by rule.
    by_runbook: HashMap<i64, i64>,
}

struct RegistryInner {
    source: Arc<dyn ExecutionStatusSource>,
    bindings: Mutex<Bindings>,
    updates: broadcast::Sender<MonitorUpdate>,
}

/// The id -> binding table. Clones share state.
#[derive(Clone)]
pub struct ExecutionRegistry {
    inner: Arc<RegistryInner>,
}

impl ExecutionRegistry {
    pub fn new(source: Arc<dyn ExecutionStatusSource>) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RegistryInner {
                source,
                bindings: Mutex::new(Bindings::default()),
                updates,
            }),
        }
    }

    /// Observe every monitored execution's mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorUpdate> {
        self.inner.updates.subscribe()
    }

    /// Begin monitoring `execution_id` over the registry's status source.
    ///
    /// Idempotent per id: if a live binding already exists the existing
    /// handle is returned and no second channel is opened.
    pub fn start_monitoring(&self, execution_id: i64) -> MonitorHandle {
        self.start_monitoring_for_runbook(execution_id, None)
    }

    /// Like `start_monitoring`, tagging the binding with the runbook that
    /// triggered it for later lookup via `completed_for_runbook`.
    pub fn start_monitoring_for_runbook(
        &self,
        execution_id: i64,
        runbook_id: Option<i64>,
    ) -> MonitorHandle {
        let mut bindings = self.inner.bindings.lock().unwrap();
        if let Some(binding) = bindings.active.get(&execution_id) {
            debug!(execution = %execution_id, "already monitoring, reusing binding");
            return MonitorHandle {
                execution_id,
                state: Arc::clone(&binding.state),
            };
        }

        info!(execution = %execution_id, "start monitoring");
        let state = Arc::new(Mutex::new(MonitorState::default()));
        let task = tokio::spawn(drive(
            Arc::clone(&self.inner),
            execution_id,
            Arc::clone(&state),
        ));
        bindings.active.insert(
            execution_id,
            ActiveBinding {
                state: Arc::clone(&state),
                runbook_id,
                task,
            },
        );

        MonitorHandle {
            execution_id,
            state,
        }
    }

    /// Close the channel for `execution_id` and demote the binding, keeping
    /// its snapshot retrievable. Safe to call repeatedly and on ids that were
    /// never monitored.
    pub fn stop_monitoring(&self, execution_id: i64) {
        let mut bindings = self.inner.bindings.lock().unwrap();
        let Some(binding) = bindings.active.remove(&execution_id) else {
            return;
        };

        info!(execution = %execution_id, "stop monitoring");
        let (snapshot, detail) = {
            let mut state = binding.state.lock().unwrap();
            state.closed = true;
            (state.aggregator.snapshot(), state.latest_detail.clone())
        };
        binding.task.abort();

        if snapshot.is_complete {
            if let Some(runbook_id) = binding.runbook_id {
                bindings.by_runbook.insert(runbook_id, execution_id);
            }
        }
        bindings
            .finished
            .insert(execution_id, FinishedEntry { snapshot, detail });
    }

    pub fn is_active(&self, execution_id: i64) -> bool {
        self.inner
            .bindings
            .lock()
            .unwrap()
            .active
            .contains_key(&execution_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.bindings.lock().unwrap().active.len()
    }

    /// Timeline snapshot for an execution, whether it is still live or
    /// already demoted to the finished index.
    pub fn snapshot(&self, execution_id: i64) -> Option<TimelineSnapshot> {
        let bindings = self.inner.bindings.lock().unwrap();
        if let Some(binding) = bindings.active.get(&execution_id) {
            return Some(binding.state.lock().unwrap().aggregator.snapshot());
        }
        bindings
            .finished
            .get(&execution_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Last cached full snapshot (pull path) for an execution, if any.
    pub fn latest_detail(&self, execution_id: i64) -> Option<ExecutionDetail> {
        let bindings = self.inner.bindings.lock().unwrap();
        if let Some(binding) = bindings.active.get(&execution_id) {
            return binding.state.lock().unwrap().latest_detail.clone();
        }
        bindings
            .finished
            .get(&execution_id)
            .and_then(|entry| entry.detail.clone())
    }

    /// Most recently completed execution for a runbook, if one finished
    /// under this registry.
    pub fn completed_for_runbook(&self, runbook_id: i64) -> Option<i64> {
        self.inner
            .bindings
            .lock()
            .unwrap()
            .by_runbook
            .get(&runbook_id)
            .copied()
    }
}

/// Per-binding driver: consumes the status source and feeds the aggregator.
/// Ends on terminal completion, transport loss, or `stop_monitoring`.
async fn drive(inner: Arc<RegistryInner>, execution_id: i64, state: Arc<Mutex<MonitorState>>) {
    let mut stream = inner.source.subscribe(execution_id).await;
    let mut lost = false;

    while let Some(event) = stream.next().await {
        match event {
            SourceEvent::Progress(ev) => {
                {
                    let mut st = state.lock().unwrap();
                    if st.closed {
                        return;
                    }
                    st.aggregator.append(&ev);
                }
                let _ = inner.updates.send(MonitorUpdate::Step {
                    execution_id,
                    step: TimelineStep::from_event(&ev),
                });
            }
            SourceEvent::Snapshot(detail) => {
                {
                    let mut st = state.lock().unwrap();
                    if st.closed {
                        return;
                    }
                    st.latest_detail = Some(detail);
                }
                let _ = inner
                    .updates
                    .send(MonitorUpdate::SnapshotRefreshed { execution_id });
            }
            SourceEvent::Lost(reason) => {
                {
                    let mut st = state.lock().unwrap();
                    if st.closed {
                        return;
                    }
                    st.aggregator.mark_transport_error(&reason);
                }
                warn!(execution = %execution_id, %reason, "progress channel lost");
                let _ = inner.updates.send(MonitorUpdate::ConnectionLost {
                    execution_id,
                    reason,
                });
                lost = true;
                break;
            }
            SourceEvent::Ended => break,
        }
    }

    demote(&inner, execution_id, &state, lost);
}

/// Move a binding from active to finished once its source has ended.
fn demote(inner: &RegistryInner, execution_id: i64, state: &Arc<Mutex<MonitorState>>, lost: bool) {
    let mut bindings = inner.bindings.lock().unwrap();

    // `stop_monitoring` may have demoted us already, and a fresh binding may
    // even exist for the same id by now -- only remove our own.
    let ours = match bindings.active.get(&execution_id) {
        Some(binding) if Arc::ptr_eq(&binding.state, state) => {
            bindings.active.remove(&execution_id).unwrap()
        }
        _ => return,
    };

    let (snapshot, detail) = {
        let st = state.lock().unwrap();
        (st.aggregator.snapshot(), st.latest_detail.clone())
    };

    let completed = !lost
        && (snapshot.is_complete
            || detail
                .as_ref()
                .map(|d| d.status.is_terminal())
                .unwrap_or(false));

    if completed {
        if let Some(runbook_id) = ours.runbook_id {
            bindings.by_runbook.insert(runbook_id, execution_id);
        }
    }
    bindings
        .finished
        .insert(execution_id, FinishedEntry { snapshot, detail });
    drop(bindings);

    if completed {
        info!(execution = %execution_id, "execution complete, binding demoted");
        let _ = inner
            .updates
            .send(MonitorUpdate::Completed { execution_id });
    }
}
