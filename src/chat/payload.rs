//! Decoding of inbound chat webhook payloads.
//!
//! Interactions arrive form-encoded as `payload=<json>`; event callbacks are
//! plain JSON. Button values carry a `k=v|k=v` envelope binding the click to
//! a thread and approval request.

use serde::Deserialize;
use std::collections::HashMap;

/// Button action ids posted on approval prompts.
pub const ACTION_APPROVE: &str = "hitl_approve";
/// Reject button id.
pub const ACTION_REJECT: &str = "hitl_reject";
/// Request-changes button id.
pub const ACTION_REQUEST_CHANGES: &str = "hitl_request_changes";

/// Decoded interaction payload (button click or modal submission).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionPayload {
    /// Clicked actions; the first one is authoritative.
    #[serde(default)]
    pub actions: Vec<InteractionAction>,
    /// Acting user.
    pub user: Option<UserRef>,
    /// Trigger for opening modals.
    pub trigger_id: Option<String>,
    /// Source message reference.
    pub message: Option<MessageRef>,
}

impl InteractionPayload {
    /// First clicked action, if any.
    pub fn action(&self) -> Option<&InteractionAction> {
        self.actions.first()
    }

    /// Acting user id, if present.
    pub fn actor(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.id.as_deref())
    }

    /// Derive a replay-safe idempotency key for this click.
    ///
    /// Scoped to the approval request and button so retried webhook
    /// deliveries of the same click collapse while distinct clicks never
    /// collide.
    pub fn idempotency_key(&self, approval_request_id: &str, action_id: &str) -> String {
        let stamp = self
            .action()
            .and_then(|a| a.action_ts.as_deref())
            .or_else(|| self.message.as_ref().and_then(|m| m.ts.as_deref()))
            .unwrap_or("unknown");
        format!("slack-interaction:{stamp}:{approval_request_id}:{action_id}")
    }
}

/// A single clicked button inside an interaction payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InteractionAction {
    /// Button identifier (`hitl_approve` etc.).
    pub action_id: Option<String>,
    /// The `k=v|k=v` envelope.
    pub value: Option<String>,
    /// Click timestamp.
    pub action_ts: Option<String>,
}

/// User reference inside chat payloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRef {
    /// Chat user id.
    pub id: Option<String>,
}

/// Message reference inside chat payloads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageRef {
    /// Message timestamp.
    pub ts: Option<String>,
}

/// Event callback wrapper (message events, URL verification).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventCallback {
    /// Callback kind (`event_callback`, `url_verification`).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Echo value for URL verification handshakes.
    pub challenge: Option<String>,
    /// The wrapped event.
    pub event: Option<MessageEvent>,
    /// Delivery id, used as the steer idempotency key.
    pub event_id: Option<String>,
}

/// A message posted in a channel or thread.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageEvent {
    /// Event kind (`message`).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Message subtype; non-empty subtypes (edits, joins) are ignored.
    pub subtype: Option<String>,
    /// Message text.
    pub text: Option<String>,
    /// Message timestamp.
    pub ts: Option<String>,
    /// Thread root timestamp when the message is a reply.
    pub thread_ts: Option<String>,
    /// Channel the message was posted in.
    pub channel: Option<String>,
    /// Posting user id.
    pub user: Option<String>,
}

impl MessageEvent {
    /// The thread this message belongs to (its own ts for thread roots).
    pub fn thread(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}

/// Parse a form-encoded interaction body (`payload=<json>`).
///
/// Returns `None` for bodies without a decodable payload; webhook handlers
/// acknowledge those without acting.
pub fn parse_interaction_body(body: &[u8]) -> Option<InteractionPayload> {
    let decoded = String::from_utf8_lossy(body);
    let payload = url::form_urlencoded::parse(decoded.as_bytes())
        .find(|(key, _)| key == "payload")
        .map(|(_, value)| value.into_owned())?;
    serde_json::from_str(&payload).ok()
}

/// Parse a JSON event callback body.
pub fn parse_event_body(body: &[u8]) -> Option<EventCallback> {
    serde_json::from_slice(body).ok()
}

/// Encode the button value envelope.
pub fn build_action_value(thread_id: &str, approval_request_id: &str, action_id: i64) -> String {
    format!("thread_id={thread_id}|approval_request_id={approval_request_id}|action_id={action_id}")
}

/// Decode a `k=v|k=v` button value envelope. Unknown chunks are kept.
pub fn parse_action_value(value: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for chunk in value.split('|') {
        if let Some((key, raw)) = chunk.split_once('=') {
            result.insert(key.to_owned(), raw.to_owned());
        }
    }
    result
}

/// Extract a selected plan (`A`/`B`/`C`) from free-text steering.
///
/// Recognizes English (`plan a`), Japanese katakana (`プランA`), and the
/// `A案` shorthand.
pub fn parse_plan_selection(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    for (plan, katakana, an) in [
        ("A", "プランa", "a案"),
        ("B", "プランb", "b案"),
        ("C", "プランc", "c案"),
    ] {
        let english = format!("plan {}", plan.to_lowercase());
        if lowered.contains(&english) || lowered.contains(katakana) || lowered.contains(an) {
            return Some(plan.to_owned());
        }
    }
    None
}

/// Keywords that mark a thread message as actionable steering.
const ACTION_KEYWORDS: [&str; 9] = [
    "mail",
    "email",
    "メール",
    "カレンダー",
    "calendar",
    "meeting",
    "会議",
    "稟議",
    "承認",
];

/// True when the message names one of the adjustable action targets.
pub fn contains_action_keyword(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ACTION_KEYWORDS
        .iter()
        .any(|key| lowered.contains(key) || text.contains(key))
}

/// Reply used when a thread message matches no plan and no keyword.
pub const DISAMBIGUATION_REPLY: &str =
    "対象が不明です。メール/カレンダー/稟議のどれを調整しますか？";
