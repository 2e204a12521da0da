//! Typed checkpoint contents: working state, metadata, and the audit trail.
//!
//! `metadata.status` is the authoritative thread status; the action row is
//! kept consistent with it inside each coordinator operation. The audit list
//! is append-only and its ordering is the sole source of causal truth for a
//! thread.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::ChatHandle;
use crate::types::ThreadStatus;

/// Operation family tags for idempotency-key scoping. A caller-supplied key
/// is recorded as `<family>:<key>`, so one literal key reused across
/// operations never makes a later operation look like a replay of an
/// earlier, different one.
pub const OP_REQUEST_APPROVAL: &str = "request_approval";
/// Approve family tag.
pub const OP_APPROVE: &str = "approve";
/// Reject family tag.
pub const OP_REJECT: &str = "reject";
/// Steer family tag.
pub const OP_STEER: &str = "steer";

fn scoped_key(operation: &str, key: &str) -> String {
    format!("{operation}:{key}")
}

/// Audit event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// An approval prompt was minted and posted.
    ApprovalRequested,
    /// A human approved the request.
    ApprovalApproved,
    /// A human rejected the request.
    ApprovalRejected,
    /// A steer amended the draft.
    HumanFeedbackReceived,
    /// Execution began under a job id.
    ExecutionStarted,
    /// The executor reported success.
    ExecutionSucceeded,
    /// The executor reported failure.
    ExecutionFailed,
}

impl AuditEventType {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::ApprovalApproved => "approval_approved",
            Self::ApprovalRejected => "approval_rejected",
            Self::HumanFeedbackReceived => "human_feedback_received",
            Self::ExecutionStarted => "execution_started",
            Self::ExecutionSucceeded => "execution_succeeded",
            Self::ExecutionFailed => "execution_failed",
        }
    }
}

/// One appended audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened.
    pub event_type: AuditEventType,
    /// Who caused it (user id, `watchdog`, `worker`).
    pub actor: Option<String>,
    /// The approval request or job the event belongs to.
    pub correlation_id: Option<String>,
    /// Free-form detail object.
    #[serde(default)]
    pub detail: Value,
    /// RFC3339 append timestamp.
    pub created_at: String,
}

/// Outcome of a tentative calendar hold attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TentativeHold {
    /// `pending`, `created`, or `failed`.
    pub status: String,
    /// Hold title (carries the `Tentative:` prefix).
    pub title: String,
    /// Invited attendee.
    pub attendee: String,
    /// Hold start (naive local datetime).
    pub start_at: String,
    /// Hold end.
    pub end_at: String,
    /// Zone the times are declared in.
    pub timezone: String,
    /// Calendar backend that took the hold.
    pub provider: String,
    /// When the hold was attempted.
    pub created_at: String,
    /// Provider event id on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Provider event link on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_link: Option<String>,
    /// Failure detail; a failed hold never blocks the approval request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The durable metadata of one approval thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadMetadata {
    /// Authoritative thread status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ThreadStatus>,
    /// The open approval request; superseded on steer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<String>,
    /// Who requested approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    /// When approval was requested (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<String>,
    /// Insertion-ordered set of observed idempotency keys, each stored
    /// scoped to its operation family (`approve:K1`).
    pub idempotency_keys: Vec<String>,
    /// Job id of the execution attempt, once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_job_id: Option<String>,
    /// Execution-side status mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ThreadStatus>,
    /// Where the approval conversation lives. Stored under the `slack` key
    /// for compatibility with the chat-side payloads.
    #[serde(rename = "slack", skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatHandle>,
    /// Append-only audit trail.
    pub audit_events: Vec<AuditEvent>,
    /// Tentative calendar hold, when one was attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tentative_calendar: Option<TentativeHold>,
    /// Intake mode tag (`watchdog` for watchdog-minted threads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Planner project tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Planner severity tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

impl ThreadMetadata {
    /// True when the key was already recorded for this thread by the same
    /// operation family.
    pub fn idempotency_seen(&self, operation: &str, key: Option<&str>) -> bool {
        match key {
            Some(key) if !key.is_empty() => {
                let scoped = scoped_key(operation, key);
                self.idempotency_keys.iter().any(|k| *k == scoped)
            }
            _ => false,
        }
    }

    /// Record a key under its operation family, keeping insertion order and
    /// ignoring duplicates.
    pub fn record_idempotency_key(&mut self, operation: &str, key: Option<&str>) {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return;
        };
        let scoped = scoped_key(operation, key);
        if !self.idempotency_keys.iter().any(|k| *k == scoped) {
            self.idempotency_keys.push(scoped);
        }
    }

    /// Append an audit event stamped now.
    pub fn append_audit(
        &mut self,
        event_type: AuditEventType,
        actor: Option<&str>,
        correlation_id: Option<&str>,
        detail: Value,
    ) {
        self.audit_events.push(AuditEvent {
            event_type,
            actor: actor.map(str::to_owned),
            correlation_id: correlation_id.map(str::to_owned),
            detail,
            created_at: Utc::now().to_rfc3339(),
        });
    }

    /// Timestamp of the most recent audit event, falling back to the request
    /// time. Used for history ordering.
    pub fn last_updated_at(&self) -> Option<&str> {
        self.audit_events
            .last()
            .map(|e| e.created_at.as_str())
            .or(self.requested_at.as_deref())
    }

    /// The recorded execution outcome, if execution ever started.
    pub fn execution_outcome(&self) -> Option<ThreadStatus> {
        let status = self.execution_status.or(self.status)?;
        status.is_execution_settled().then_some(status)
    }
}

/// The opaque working state of one approval thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadState {
    /// Thread id, mirrored into the state for operator tooling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Owning action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<i64>,
    /// Originating planner proposal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<i64>,
    /// Current draft snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    /// Last steer feedback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// Last selected plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_plan: Option<String>,
}
