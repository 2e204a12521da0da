//! Executor payload types and draft-content extraction.
//!
//! Upstream planners embed the machine-readable payload as the final `{…}`
//! line of an action's free-text draft. Extraction walks the draft bottom-up
//! and takes the first line that parses as a JSON object; everything else in
//! the draft is prose for the human approver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ExecutorConfig;
use crate::types::ActionKind;

/// Payload for an outbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Sender address.
    #[serde(rename = "from")]
    pub sender: String,
}

/// Payload for a calendar booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarPayload {
    /// Primary attendee email.
    pub attendee: String,
    /// Additional attendee emails.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    /// Event title.
    pub title: String,
    /// Start datetime (ISO-8601, naive or offset-bearing).
    pub start_at: String,
    /// End datetime (ISO-8601, naive or offset-bearing).
    pub end_at: String,
    /// IANA timezone name the datetimes are declared in.
    pub timezone: String,
    /// Event description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// External meeting URL; suppresses generated conferencing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    /// Calendar owner email for credential resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    /// Calendar owner user id for credential resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<String>,
    /// Target calendar override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
}

/// Payload for an HR request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrPayload {
    /// Employee the request concerns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    /// Request category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<String>,
    /// One-line summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Unrecognized fields, forwarded to the HR backend as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A typed executor payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    /// Email dispatch.
    Email(EmailPayload),
    /// Calendar booking.
    Calendar(CalendarPayload),
    /// HR request.
    Hr(HrPayload),
}

/// Extract the embedded JSON payload from a draft.
///
/// Scans the draft's lines in reverse for the last line that starts with `{`
/// and parses as a JSON object. Returns an empty map when the draft has no
/// such line.
pub fn extract_payload_from_draft(draft_content: Option<&str>) -> Map<String, Value> {
    let Some(draft) = draft_content else {
        return Map::new();
    };
    for line in draft.lines().rev() {
        let candidate = line.trim();
        if !candidate.starts_with('{') {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            return map;
        }
    }
    Map::new()
}

fn get_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// First non-empty string among the given keys (snake_case and camelCase
/// spellings are passed together by callers).
fn get_str_any(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| get_str(map, key))
        .map(|v| v.trim().to_owned())
        .find(|v| !v.is_empty())
}

/// Coerce a raw payload map into the typed payload for the action kind,
/// filling defaults from configuration for missing fields.
///
/// `draft_content` backstops the email body and calendar description the way
/// the upstream planner intends: the prose itself is the fallback payload.
pub fn coerce_payload(
    kind: ActionKind,
    map: &Map<String, Value>,
    draft_content: Option<&str>,
    config: &ExecutorConfig,
    default_start: &str,
    default_end: &str,
) -> ActionPayload {
    match kind {
        ActionKind::EmailDraft => ActionPayload::Email(EmailPayload {
            to: get_str_any(map, &["to"]).unwrap_or_else(|| config.default_email_to.clone()),
            subject: get_str_any(map, &["subject"])
                .unwrap_or_else(|| format!("Approval action {kind}")),
            body: get_str_any(map, &["body", "content"])
                .or_else(|| draft_content.map(str::to_owned))
                .unwrap_or_else(|| "Action executed.".to_owned()),
            sender: get_str_any(map, &["from"])
                .unwrap_or_else(|| config.default_email_from.clone()),
        }),
        ActionKind::CalendarBooking => {
            let attendees = map
                .get("attendees")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default();
            ActionPayload::Calendar(CalendarPayload {
                attendee: get_str_any(map, &["attendee"])
                    .unwrap_or_else(|| config.attendee_fallback().to_owned()),
                attendees,
                title: get_str_any(map, &["title"])
                    .unwrap_or_else(|| format!("Approval action {kind}")),
                start_at: get_str_any(map, &["start_at", "startAt"])
                    .unwrap_or_else(|| default_start.to_owned()),
                end_at: get_str_any(map, &["end_at", "endAt"])
                    .unwrap_or_else(|| default_end.to_owned()),
                timezone: get_str_any(map, &["timezone"])
                    .unwrap_or_else(|| config.default_timezone.clone()),
                description: get_str_any(map, &["description"])
                    .or_else(|| draft_content.map(str::to_owned)),
                meeting_url: get_str_any(map, &["meeting_url", "meetingUrl"]),
                owner_email: get_str_any(map, &["owner_email", "ownerEmail"])
                    .or_else(|| config.default_owner_email.clone()),
                owner_user_id: get_str_any(map, &["owner_user_id", "ownerUserId"]),
                calendar_id: get_str_any(map, &["calendar_id", "calendarId"]),
            })
        }
        ActionKind::HrRequest => {
            // An `hr_request` sub-object takes precedence over the top level.
            let source = map
                .get("hr_request")
                .and_then(Value::as_object)
                .unwrap_or(map);
            let mut payload: HrPayload =
                serde_json::from_value(Value::Object(source.clone())).unwrap_or_default();
            if payload.summary.is_none()
                && payload.request_type.is_none()
                && payload.employee_id.is_none()
                && payload.extra.is_empty()
            {
                payload.summary = draft_content.map(str::to_owned);
            }
            ActionPayload::Hr(payload)
        }
    }
}

/// Redacted snapshot of a payload for the run record: long free-text fields
/// are truncated so the append-only table does not mirror entire drafts.
pub fn redacted_snapshot(payload: &ActionPayload) -> Value {
    const LIMIT: usize = 160;
    fn truncate(value: &str) -> String {
        if value.chars().count() <= LIMIT {
            return value.to_owned();
        }
        let cut: String = value.chars().take(LIMIT).collect();
        format!("{cut}...")
    }

    match payload {
        ActionPayload::Email(email) => serde_json::json!({
            "to": email.to,
            "subject": email.subject,
            "body": truncate(&email.body),
            "from": email.sender,
        }),
        ActionPayload::Calendar(cal) => serde_json::json!({
            "attendee": cal.attendee,
            "attendees": cal.attendees,
            "title": cal.title,
            "start_at": cal.start_at,
            "end_at": cal.end_at,
            "timezone": cal.timezone,
            "description": cal.description.as_deref().map(truncate),
            "meeting_url": cal.meeting_url,
        }),
        ActionPayload::Hr(hr) => serde_json::json!({
            "employee_id": hr.employee_id,
            "request_type": hr.request_type,
            "summary": hr.summary.as_deref().map(truncate),
        }),
    }
}
