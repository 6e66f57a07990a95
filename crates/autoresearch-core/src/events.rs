//! Progress events for live display of a running session.
//!
//! The orchestrator emits a [`ProgressEvent`] at each stage transition; a
//! presentation layer drains the receiver half to render them.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Stage-transition notifications emitted during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    PlanningStarted {
        session_id: String,
        query: String,
    },
    PlanReady {
        session_id: String,
        queries: Vec<String>,
    },
    ResearchComplete {
        session_id: String,
        sources: usize,
        failed_queries: usize,
    },
    DraftReady {
        session_id: String,
        revision: u32,
    },
    DraftRejected {
        session_id: String,
        score: u8,
        revision: u32,
        feedback_items: usize,
    },
    DraftApproved {
        session_id: String,
        score: u8,
        revision: u32,
    },
    FinalReportReady {
        session_id: String,
        approved: bool,
        revisions: u32,
    },
    SessionFailed {
        session_id: String,
        reason: String,
    },
}

impl ProgressEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ProgressEvent::PlanningStarted { session_id, .. }
            | ProgressEvent::PlanReady { session_id, .. }
            | ProgressEvent::ResearchComplete { session_id, .. }
            | ProgressEvent::DraftReady { session_id, .. }
            | ProgressEvent::DraftRejected { session_id, .. }
            | ProgressEvent::DraftApproved { session_id, .. }
            | ProgressEvent::FinalReportReady { session_id, .. }
            | ProgressEvent::SessionFailed { session_id, .. } => session_id,
        }
    }

    /// One-line human description, used by the CLI.
    pub fn describe(&self) -> String {
        match self {
            ProgressEvent::PlanningStarted { query, .. } => format!("planning research for \"{query}\""),
            ProgressEvent::PlanReady { queries, .. } => {
                format!("plan ready: {}", queries.join(" | "))
            }
            ProgressEvent::ResearchComplete {
                sources,
                failed_queries,
                ..
            } => format!("research complete with {sources} sources ({failed_queries} failed queries)"),
            ProgressEvent::DraftReady { revision, .. } => format!("draft written (revision {revision})"),
            ProgressEvent::DraftRejected {
                score,
                revision,
                feedback_items,
                ..
            } => format!(
                "draft rejected with score {score} at revision {revision} ({feedback_items} feedback items)"
            ),
            ProgressEvent::DraftApproved { score, .. } => format!("draft approved with score {score}"),
            ProgressEvent::FinalReportReady {
                approved,
                revisions,
                ..
            } => format!(
                "final report ready after {revisions} revision(s){}",
                if *approved { "" } else { " (unapproved)" }
            ),
            ProgressEvent::SessionFailed { reason, .. } => format!("session failed: {reason}"),
        }
    }
}

/// Envelope carrying an event and its emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: u64,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

/// Sender half handed to the orchestrator.
#[derive(Clone, Default)]
pub struct EventCollector {
    sender: Option<mpsc::UnboundedSender<EventEnvelope>>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A collector that drops every event.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        let envelope = EventEnvelope {
            timestamp: current_timestamp(),
            event,
        };
        if let Err(e) = sender.send(envelope) {
            tracing::debug!(error = %e, "progress receiver dropped; event discarded");
        }
    }
}

/// Get current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
