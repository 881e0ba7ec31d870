//! Wire types for the Athena execution service.
//!
//! Everything here is *read* from the service -- the monitor never invents an
//! execution, a result row, or a status classification of its own.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Lifecycle status of an execution (or of a single node within one).
///
/// `pending` and `running` are the only non-terminal states. Once the service
/// reports a terminal value it never changes again for that execution id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    /// Some nodes succeeded, some failed. The classification is made by the
    /// execution service; we only display it.
    Partial,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Partial)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

/// One execution summary row, as returned by `GET /executions`.
///
/// Timestamps are naive UTC: the service serializes `utcnow()` without an
/// offset, so `NaiveDateTime` round-trips the wire format exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub runbook_id: i64,
    #[serde(default)]
    pub runbook_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: NaiveDateTime,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    /// Trigger source label, e.g. "manual" or "scheduler".
    pub triggered_by: String,
}

/// Full execution snapshot from `GET /executions/{id}`, including per-node
/// results. This is the authoritative post-completion data source; the push
/// channel only carries progress narration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    pub id: i64,
    pub runbook_id: i64,
    #[serde(default)]
    pub runbook_name: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: NaiveDateTime,
    #[serde(default)]
    pub completed_at: Option<NaiveDateTime>,
    pub triggered_by: String,
    #[serde(default)]
    pub results: Vec<ExecutionResult>,
}

/// Result of running the commands on one target node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub id: Option<i64>,
    pub hostname: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub ai_resources: Vec<AiResource>,
}

/// Health level assigned to a resource by the AI analysis step.
/// Wire format is uppercase to match the service schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceStatus {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One AI-derived health assessment extracted from command output
/// (a disk, a container, a service, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiResource {
    pub resource_name: String,
    pub status: ResourceStatus,
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Key metric if available. Scalar or structured, so kept as raw JSON.
    #[serde(default)]
    pub metric_value: Option<serde_json::Value>,
}

/// Event type carried on the progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Step,
    Incident,
    Error,
    Complete,
}

impl EventKind {
    /// `complete` and `error` are the terminal event types: the channel
    /// closes itself after delivering one of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// One parsed message from the execution progress stream.
///
/// Unknown `type` values or malformed JSON fail to parse; the channel drops
/// such payloads silently per the stream contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl StreamEvent {
    /// Parse a raw stream payload. Errors are the caller's cue to drop the
    /// frame, never to tear the channel down.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Partial.is_terminal());
    }

    #[test]
    fn test_parse_step_event() {
        let ev = StreamEvent::parse(r#"{"type":"step","message":"Connecting..."}"#).unwrap();
        assert_eq!(ev.kind, EventKind::Step);
        assert_eq!(ev.message, "Connecting...");
        assert!(ev.status.is_none());
        assert!(!ev.kind.is_terminal());
    }

    #[test]
    fn test_parse_full_event() {
        let raw = r#"{
            "type": "incident",
            "message": "disk usage above threshold",
            "status": "warning",
            "severity": "major",
            "node": "web-01",
            "details": {"usage_percent": 92.5}
        }"#;
        let ev = StreamEvent::parse(raw).unwrap();
        assert_eq!(ev.kind, EventKind::Incident);
        assert_eq!(ev.severity.as_deref(), Some("major"));
        assert_eq!(ev.node.as_deref(), Some("web-01"));
        assert!(ev.details.is_some());
    }

    #[test]
    fn test_terminal_event_kinds() {
        let done = StreamEvent::parse(r#"{"type":"complete","message":"Done"}"#).unwrap();
        assert!(done.kind.is_terminal());
        let err = StreamEvent::parse(r#"{"type":"error","message":"SSH refused"}"#).unwrap();
        assert!(err.kind.is_terminal());
    }

    #[test]
    fn test_unknown_event_type_is_malformed() {
        assert!(StreamEvent::parse(r#"{"type":"heartbeat","message":"tick"}"#).is_err());
        assert!(StreamEvent::parse("not json at all").is_err());
        assert!(StreamEvent::parse(r#"{"message":"no type"}"#).is_err());
    }

    #[test]
    fn test_execution_detail_parse() {
        // Shape as served by the execution service, naive timestamps included.
        let raw = r#"{
            "id": 42,
            "runbook_id": 7,
            "runbook_name": "nightly-health",
            "status": "partial",
            "started_at": "2026-08-23T04:00:00.123456",
            "completed_at": "2026-08-23T04:02:11.000001",
            "triggered_by": "scheduler",
            "results": [
                {
                    "id": 1,
                    "hostname": "web-01",
                    "status": "success",
                    "stdout": "Filesystem ...",
                    "stderr": "",
                    "exit_code": 0,
                    "ai_summary": "All filesystems healthy",
                    "ai_resources": [
                        {
                            "resource_name": "/dev/sda1",
                            "status": "OK",
                            "metric_value": "48%",
                            "reasoning": "usage well below threshold"
                        }
                    ]
                },
                {
                    "hostname": "web-02",
                    "status": "failed",
                    "exit_code": -1,
                    "stderr": "SSH error: connection refused"
                }
            ]
        }"#;
        let detail: ExecutionDetail = serde_json::from_str(raw).unwrap();
        assert_eq!(detail.id, 42);
        assert_eq!(detail.status, ExecutionStatus::Partial);
        assert_eq!(detail.results.len(), 2);
        assert_eq!(detail.results[0].ai_resources[0].status, ResourceStatus::Ok);
        assert_eq!(detail.results[1].exit_code, Some(-1));
        assert!(detail.results[1].ai_resources.is_empty());
    }
}
