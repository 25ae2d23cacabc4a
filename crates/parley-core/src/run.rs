//! Run lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a run. Exactly one of the terminal states
/// (`Final`, `Aborted`, `Error`) is reached per admitted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Final,
    Aborted,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Final | RunStatus::Aborted | RunStatus::Error)
    }
}

/// A submission as received from the surrounding system.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub session_key: String,
    pub agent_id: String,
    pub message: String,
    pub idempotency_key: Option<String>,
}

impl SubmitRequest {
    pub fn new(
        session_key: impl Into<String>,
        agent_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            agent_id: agent_id.into(),
            message: message.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// One admitted execution request.
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub session_key: String,
    pub agent_id: String,
    pub message: String,
    pub idempotency_key: Option<String>,
    pub status: RunStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub iterations: usize,
}

impl Run {
    /// Create a fresh queued run from a submission.
    pub fn new(request: &SubmitRequest) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Self {
            run_id,
            session_key: request.session_key.clone(),
            agent_id: request.agent_id.clone(),
            message: request.message.clone(),
            idempotency_key: request.idempotency_key.clone(),
            status: RunStatus::Queued,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            iterations: 0,
        }
    }

    /// Transition to running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }
}

/// Synchronous answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitAck {
    Started {
        run_id: String,
    },
    Queued {
        run_id: String,
        position: usize,
        queue_depth: usize,
    },
    /// Admission rejected; no run was created.
    QueueFull,
}

impl SubmitAck {
    pub fn run_id(&self) -> Option<&str> {
        match self {
            SubmitAck::Started { run_id } => Some(run_id),
            SubmitAck::Queued { run_id, .. } => Some(run_id),
            SubmitAck::QueueFull => None,
        }
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub content: Option<String>,
    pub error: Option<String>,
    pub iterations: usize,
    /// The loop hit its iteration budget rather than completing cleanly.
    pub iteration_capped: bool,
}

impl RunOutcome {
    pub fn finished(content: impl Into<String>, iterations: usize) -> Self {
        Self {
            status: RunStatus::Final,
            content: Some(content.into()),
            error: None,
            iterations,
            iteration_capped: false,
        }
    }

    pub fn capped(content: Option<String>, iterations: usize) -> Self {
        Self {
            status: RunStatus::Final,
            content,
            error: None,
            iterations,
            iteration_capped: true,
        }
    }

    pub fn aborted(iterations: usize) -> Self {
        Self {
            status: RunStatus::Aborted,
            content: None,
            error: None,
            iterations,
            iteration_capped: false,
        }
    }

    pub fn failed(error: impl Into<String>, iterations: usize) -> Self {
        Self {
            status: RunStatus::Error,
            content: None,
            error: Some(error.into()),
            iterations,
            iteration_capped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_is_queued_with_short_id() {
        let run = Run::new(&SubmitRequest::new("session:a", "main", "hello"));
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.run_id.len(), 12);
        assert!(run.started_at.is_none());
    }

    #[test]
    fn start_transitions_to_running() {
        let mut run = Run::new(&SubmitRequest::new("session:a", "main", "hello"));
        run.start();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.started_at.is_some());
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Final.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(RunStatus::Error.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn ack_serializes_with_status_tag() {
        let ack = SubmitAck::Queued {
            run_id: "abc".to_string(),
            position: 1,
            queue_depth: 1,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["run_id"], "abc");
        assert_eq!(
            serde_json::to_value(&SubmitAck::QueueFull).unwrap()["status"],
            "queue_full"
        );
    }
}
