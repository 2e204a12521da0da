//! Core domain types shared across the coordinator, executor, and intake
//! surfaces.

use serde::{Deserialize, Serialize};

/// Kind of external side effect an action produces when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Draft an outbound email.
    EmailDraft,
    /// Book a calendar event.
    CalendarBooking,
    /// File an HR request.
    HrRequest,
}

impl ActionKind {
    /// Stable string form used in database rows and chat payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailDraft => "email_draft",
            Self::CalendarBooking => "calendar_booking",
            Self::HrRequest => "hr_request",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown kinds.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email_draft" => Some(Self::EmailDraft),
            "calendar_booking" => Some(Self::CalendarBooking),
            "hr_request" => Some(Self::HrRequest),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an approval thread and its action row.
///
/// Transitions form the graph:
/// `drafted → approval_pending → {approved, rejected}`;
/// `approved → executing → {executed, failed}`; a steer from
/// `approval_pending` returns the thread to `drafted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Draft exists, no approval requested yet.
    Drafted,
    /// Waiting on a human decision.
    ApprovalPending,
    /// Approved, execution not yet started.
    Approved,
    /// Rejected by an approver. Terminal.
    Rejected,
    /// Executor invocation in flight.
    Executing,
    /// Executor succeeded. Terminal.
    Executed,
    /// Executor failed. Terminal until a steer re-drives the thread.
    Failed,
}

impl ThreadStatus {
    /// Stable string form used in database rows and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drafted => "drafted",
            Self::ApprovalPending => "approval_pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stable string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "drafted" => Some(Self::Drafted),
            "approval_pending" => Some(Self::ApprovalPending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "executing" => Some(Self::Executing),
            "executed" => Some(Self::Executed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True once execution has started or reached a terminal outcome.
    ///
    /// Threads in one of these states never re-enter the executor; duplicate
    /// approve deliveries observe the recorded result instead.
    pub fn is_execution_settled(&self) -> bool {
        matches!(self, Self::Executing | Self::Executed | Self::Failed)
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project risk classification derived from health scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    /// No intervention needed.
    Safe,
    /// Worth a proposed action.
    Warning,
    /// Needs a meeting, not just mail.
    Critical,
}

impl RiskLevel {
    /// Stable string form used in snapshots and alert rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "Safe",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action row as stored in `autonomous_actions`.
///
/// Created by the watchdog or the intake API; mutated only by the
/// coordinator; never deleted.
#[derive(Debug, Clone)]
pub struct ActionRow {
    /// Monotonically assigned identifier.
    pub action_id: i64,
    /// Optional reference to the planner proposal that produced the draft.
    pub proposal_id: Option<i64>,
    /// Kind of external side effect.
    pub action_type: ActionKind,
    /// Free text; may embed the executor JSON payload as its final `{…}` line.
    pub draft_content: Option<String>,
    /// Current lifecycle status, kept consistent with checkpoint metadata.
    pub status: ThreadStatus,
    /// Mirror of `status == approved`-or-later for quick filtering.
    pub is_approved: bool,
}

/// Derive the durable thread id for an action.
pub fn thread_id_for_action(action_id: i64) -> String {
    format!("action-{action_id}")
}

/// Mint a short correlation id with the given prefix (`apr`, `job`, `ext`…).
pub fn short_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..12])
}
