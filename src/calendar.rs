//! Calendar provider client: event canonicalization and creation.
//!
//! Builds the provider's canonical event object from a [`CalendarPayload`]:
//! ISO datetimes (`Z` mapped to `+00:00`, naive values carried with the
//! declared timezone, date-only values promoted to midnight), attendees
//! deduplicated case-insensitively, generated conferencing only when no
//! meeting URL was supplied, and the meeting URL merged into the
//! description. A conference-allocation failure triggers a single retry
//! without conference data.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};
use crate::executor::payload::CalendarPayload;

/// True when the name resolves in the IANA timezone database.
pub fn is_known_zone(name: &str) -> bool {
    name.parse::<Tz>().is_ok()
}

/// Resolve a zone name for local date math, landing on the provider default
/// zone when the name (including a misconfigured default) is unknown.
pub fn zone_or_default(name: &str) -> Tz {
    name.parse().unwrap_or(chrono_tz::Asia::Tokyo)
}

/// Default API base for the hosted calendar service.
const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// HTTP client for the calendar provider.
pub struct CalendarClient {
    http: reqwest::Client,
    api_base: String,
}

impl Default for CalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CalendarClient {
    /// Client against the hosted calendar API.
    pub fn new() -> Self {
        Self::with_base(CALENDAR_API_BASE)
    }

    /// Client against an alternate base URL (tests, private deployments).
    pub fn with_base(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: api_base.into(),
        }
    }

    /// Create an event, retrying once without conference data when the
    /// conference allocation is what failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] for unusable datetimes and
    /// [`Error::Integration`] when the provider rejects the event.
    pub async fn create_event(
        &self,
        access_token: &str,
        payload: &CalendarPayload,
        default_calendar_id: &str,
    ) -> Result<Value> {
        let calendar_id = payload
            .calendar_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(default_calendar_id);
        let include_conference = payload
            .meeting_url
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .is_none();

        let event = build_event(payload, include_conference)?;
        match self
            .insert_event(access_token, &event, include_conference, calendar_id)
            .await
        {
            Ok(created) => Ok(created),
            Err(e) if include_conference => {
                warn!(error = %e, "conference allocation failed; retrying without conference data");
                let event = build_event(payload, false)?;
                self.insert_event(access_token, &event, false, calendar_id)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn insert_event(
        &self,
        access_token: &str,
        event: &Value,
        include_conference: bool,
        calendar_id: &str,
    ) -> Result<Value> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| Error::Invariant(format!("calendar api base is not a URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| Error::Invariant("calendar api base cannot carry paths".to_owned()))?
            .push("calendars")
            .push(calendar_id)
            .push("events");
        url.query_pairs_mut().append_pair("sendUpdates", "all");
        if include_conference {
            url.query_pairs_mut().append_pair("conferenceDataVersion", "1");
        }

        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .or_else(|| body.get("error_description").and_then(Value::as_str))
                .unwrap_or("event creation rejected")
                .to_owned();
            return Err(Error::integration_status("google", status.as_u16(), message));
        }
        Ok(body)
    }
}

/// Build the canonical event object.
///
/// # Errors
///
/// Returns [`Error::Invalid`] when a datetime cannot be normalized.
pub fn build_event(payload: &CalendarPayload, include_conference: bool) -> Result<Value> {
    let start = normalize_datetime(&payload.start_at)?;
    let end = normalize_datetime(&payload.end_at)?;
    let meeting_url = payload
        .meeting_url
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let description = merge_description(payload.description.as_deref(), meeting_url);
    let attendees = collect_attendees(payload);

    let mut event = json!({
        "summary": payload.title,
        "start": { "dateTime": start, "timeZone": payload.timezone },
        "end": { "dateTime": end, "timeZone": payload.timezone },
        "attendees": attendees.iter().map(|email| json!({ "email": email })).collect::<Vec<_>>(),
    });
    if let Some(description) = description {
        event["description"] = json!(description);
    }
    if let Some(meeting_url) = meeting_url {
        event["location"] = json!(meeting_url);
    }
    if include_conference {
        event["conferenceData"] = json!({
            "createRequest": {
                "requestId": uuid::Uuid::new_v4().simple().to_string(),
                "conferenceSolutionKey": { "type": "hangoutsMeet" },
            }
        });
    }
    Ok(event)
}

/// Normalize an ISO-8601-ish datetime for the provider.
///
/// `Z` becomes `+00:00`; offset-bearing values are kept as RFC3339; naive
/// values pass through unchanged (the event's `timeZone` declares their
/// zone); date-only values are promoted to midnight.
///
/// # Errors
///
/// Returns [`Error::Invalid`] for empty or unparseable values.
pub fn normalize_datetime(value: &str) -> Result<String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err(Error::Invalid("missing datetime value".to_owned()));
    }
    let raw = if let Some(prefix) = raw.strip_suffix('Z') {
        format!("{prefix}+00:00")
    } else {
        raw.to_owned()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.to_rfc3339());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, fmt) {
            return Ok(naive.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        return Ok(format!("{}T00:00:00", date.format("%Y-%m-%d")));
    }
    Err(Error::Invalid(format!("invalid datetime value `{value}`")))
}

/// Gather attendees from the list and the primary field, deduplicated
/// case-insensitively while preserving the first spelling seen.
pub fn collect_attendees(payload: &CalendarPayload) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let candidates = payload
        .attendees
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(payload.attendee.as_str()));
    for email in candidates {
        let trimmed = email.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            unique.push(trimmed.to_owned());
        }
    }
    unique
}

/// Merge the meeting URL into the description without duplicating it.
fn merge_description(description: Option<&str>, meeting_url: Option<&str>) -> Option<String> {
    let base = description.map(str::trim).unwrap_or("");
    let Some(meeting_url) = meeting_url else {
        return if base.is_empty() {
            None
        } else {
            Some(base.to_owned())
        };
    };
    if base.contains(meeting_url) {
        return Some(base.to_owned());
    }
    let line = format!("Meeting URL: {meeting_url}");
    if base.is_empty() {
        Some(line)
    } else {
        Some(format!("{base}\n\n{line}"))
    }
}
