//! Per-execution timeline: the ordered progress narration built from
//! streamed events.
//!
//! The aggregator is deliberately dumb. The execution service is the single
//! source of ordering truth, so there is no deduplication, no re-sorting by
//! timestamp, no reconciliation -- steps are appended in arrival order and
//! never mutated or removed afterwards.

use crate::model::{EventKind, StreamEvent};
use serde::Serialize;

/// Display status of a single timeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
    InProgress,
}

/// One entry in an execution's progress timeline. Position in the owning
/// `Vec` is the arrival order; there is no other ordering key.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineStep {
    pub message: String,
    pub status: StepStatus,
    pub kind: EventKind,
    pub severity: Option<String>,
    pub node: Option<String>,
}

impl TimelineStep {
    /// Map a parsed stream event into a step.
    ///
    /// A recognized explicit `status` field wins; otherwise the status
    /// defaults to success, except `error` events which default to error.
    pub fn from_event(event: &StreamEvent) -> Self {
        let status = match event.status.as_deref() {
            Some("success") => StepStatus::Success,
            Some("warning") => StepStatus::Warning,
            Some("error") => StepStatus::Error,
            Some("in_progress") => StepStatus::InProgress,
            _ => {
                if event.kind == EventKind::Error {
                    StepStatus::Error
                } else {
                    StepStatus::Success
                }
            }
        };

        Self {
            message: event.message.clone(),
            status,
            kind: event.kind,
            severity: event.severity.clone(),
            node: event.node.clone(),
        }
    }
}

/// Owns one execution's ordered step history and terminal-detection state.
#[derive(Debug, Default)]
pub struct TimelineAggregator {
    steps: Vec<TimelineStep>,
    complete: bool,
    last_error: Option<String>,
}

/// Read-only copy of an aggregator's state at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineSnapshot {
    pub steps: Vec<TimelineStep>,
    pub is_complete: bool,
    pub last_error: Option<String>,
}

impl TimelineAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one parsed event. Terminal kinds (`complete`/`error`) flip
    /// `is_complete` *after* the append, so the terminal marker itself is
    /// visible as the final step of the timeline.
    pub fn append(&mut self, event: &StreamEvent) {
        self.steps.push(TimelineStep::from_event(event));
        if event.kind.is_terminal() {
            self.complete = true;
        }
    }

    /// Record a transport failure ("connection lost"). The timeline stays
    /// exactly as accumulated and remains non-terminal: a dropped channel is
    /// not an execution outcome.
    pub fn mark_transport_error(&mut self, reason: &str) {
        self.last_error = Some(reason.to_string());
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn snapshot(&self) -> TimelineSnapshot {
        TimelineSnapshot {
            steps: self.steps.clone(),
            is_complete: self.complete,
            last_error: self.last_error.clone(),
        }
    }
}
