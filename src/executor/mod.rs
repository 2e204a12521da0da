//! External Action Executor: dispatches approved payloads to providers and
//! records every attempt.
//!
//! Every invocation appends at least one `external_action_runs` row, success
//! or failure. A payload whose embedded JSON carries an `actions` list fans
//! out into one run per sub-action under the same job; the whole call fails
//! if any sub-action failed.

pub mod payload;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::{info, instrument, warn};

use crate::calendar::CalendarClient;
use crate::config::ExecutorConfig;
use crate::credentials::CredentialStore;
use crate::db::{actions, runs::RunRow};
use crate::error::{Error, Result};
use crate::types::ActionKind;
use payload::{coerce_payload, extract_payload_from_draft, redacted_snapshot, ActionPayload};

/// Dispatches approved actions to email, calendar, and HR backends.
pub struct ExternalActionExecutor {
    config: ExecutorConfig,
    credentials: Arc<CredentialStore>,
    calendar: CalendarClient,
    http: reqwest::Client,
}

impl ExternalActionExecutor {
    /// Build an executor over the given provider configuration.
    pub fn new(config: ExecutorConfig, credentials: Arc<CredentialStore>) -> Self {
        Self {
            config,
            credentials,
            calendar: CalendarClient::new(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// The provider configuration this executor runs with.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute the action's payload, recording one run row per attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing action and
    /// [`Error::Integration`] / [`Error::Credential`] when a provider call
    /// fails — after the failed run has been recorded.
    #[instrument(skip(self, conn, payload_override))]
    pub async fn execute(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        action_id: i64,
        payload_override: Option<Map<String, Value>>,
    ) -> Result<Vec<RunRow>> {
        let action = actions::load_action(conn, action_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("action {action_id}")))?;

        let draft = action.draft_content.as_deref();
        let raw = match payload_override {
            Some(map) => map,
            None => extract_payload_from_draft(draft),
        };

        if let Some(items) = raw.get("actions").and_then(Value::as_array) {
            let items = items.to_vec();
            return self.execute_batch(conn, job_id, action_id, &items).await;
        }

        let (default_start, default_end) = self.default_window();
        let typed = coerce_payload(
            action.action_type,
            &raw,
            draft,
            &self.config,
            &default_start,
            &default_end,
        );
        let run = self
            .execute_single(conn, job_id, action_id, action.action_type, &typed, true)
            .await?;
        Ok(vec![run])
    }

    /// Fan-out execution: one run per recognized sub-action, all under the
    /// same job. Unknown types are skipped; any failure fails the whole call
    /// after every attempt has been recorded.
    async fn execute_batch(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        action_id: i64,
        items: &[Value],
    ) -> Result<Vec<RunRow>> {
        let (default_start, default_end) = self.default_window();
        let mut results = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for item in items {
            let kind = item
                .get("type")
                .or_else(|| item.get("action_type"))
                .and_then(Value::as_str)
                .and_then(ActionKind::parse);
            let Some(kind) = kind else {
                continue;
            };
            let map = item
                .get("payload")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let typed = coerce_payload(kind, &map, None, &self.config, &default_start, &default_end);
            let run = self
                .execute_single(conn, job_id, action_id, kind, &typed, false)
                .await?;
            if run.status != "succeeded" {
                errors.push(run.error.clone().unwrap_or_else(|| "unknown error".to_owned()));
            }
            results.push(run);
        }
        if !errors.is_empty() {
            return Err(Error::integration("batch", errors.join("; ")));
        }
        Ok(results)
    }

    /// Dispatch one typed payload and record its run row.
    async fn execute_single(
        &self,
        conn: &mut SqliteConnection,
        job_id: &str,
        action_id: i64,
        kind: ActionKind,
        typed: &ActionPayload,
        raise_on_error: bool,
    ) -> Result<RunRow> {
        let provider = self.provider_for(kind).to_owned();
        let outcome = self.dispatch(conn, typed).await;

        let (status, response, error) = match &outcome {
            Ok(response) => ("succeeded", Some(response.to_string()), None),
            Err(e) => ("failed", None, Some(e.to_string())),
        };

        let run = RunRow {
            run_id: crate::types::short_id("ext"),
            job_id: job_id.to_owned(),
            action_id,
            action_type: kind.as_str().to_owned(),
            provider: provider.clone(),
            status: status.to_owned(),
            payload: Some(redacted_snapshot(typed).to_string()),
            response,
            error,
            executed_at: Utc::now().to_rfc3339(),
        };
        crate::db::runs::insert_run(conn, &run).await?;

        if run.status == "succeeded" {
            info!(job_id, action_id, %provider, run_id = %run.run_id, "external action succeeded");
        } else {
            warn!(
                job_id,
                action_id,
                %provider,
                run_id = %run.run_id,
                error = run.error.as_deref().unwrap_or(""),
                "external action failed"
            );
            if raise_on_error {
                return Err(Error::integration(
                    provider,
                    run.error
                        .clone()
                        .unwrap_or_else(|| "external action failed".to_owned()),
                ));
            }
        }
        Ok(run)
    }

    fn provider_for(&self, kind: ActionKind) -> &str {
        match kind {
            ActionKind::EmailDraft => &self.config.email_provider,
            ActionKind::CalendarBooking => &self.config.calendar_provider,
            ActionKind::HrRequest => &self.config.hr_provider,
        }
    }

    async fn dispatch(&self, conn: &mut SqliteConnection, typed: &ActionPayload) -> Result<Value> {
        match typed {
            ActionPayload::Email(email) => self.send_email(email),
            ActionPayload::Calendar(cal) => self.create_calendar_event(conn, cal).await,
            ActionPayload::Hr(hr) => self.send_hr_request(hr).await,
        }
    }

    fn send_email(&self, email: &payload::EmailPayload) -> Result<Value> {
        if self.config.email_provider != "mock" {
            return Err(Error::integration(
                self.config.email_provider.clone(),
                format!(
                    "unsupported email provider `{}`",
                    self.config.email_provider
                ),
            ));
        }
        Ok(serde_json::json!({
            "message_id": provider_id("mail"),
            "to": email.to,
            "from": email.sender,
            "subject": email.subject,
            "status": "sent",
        }))
    }

    /// Create a calendar event with the configured backend.
    ///
    /// Public so the coordinator can place tentative holds and the demo
    /// driver can book its meeting through the same path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] when no owner token can be resolved and
    /// [`Error::Integration`] when the provider rejects the event.
    pub async fn create_calendar_event(
        &self,
        conn: &mut SqliteConnection,
        cal: &payload::CalendarPayload,
    ) -> Result<Value> {
        if self.config.calendar_provider == "mock" {
            return Ok(serde_json::json!({
                "event_id": provider_id("cal"),
                "attendee": cal.attendee,
                "title": cal.title,
                "start_at": cal.start_at,
                "end_at": cal.end_at,
                "timezone": cal.timezone,
                "status": "confirmed",
            }));
        }

        let access_token = self
            .credentials
            .resolve_access_token(conn, cal.owner_user_id.as_deref(), cal.owner_email.as_deref())
            .await
            .map_err(|e| match e {
                // Name the owner so the operator can link the right account.
                Error::Credential(msg) => Error::Credential(format!(
                    "{msg} (owner: {})",
                    cal.owner_email
                        .as_deref()
                        .or(cal.owner_user_id.as_deref())
                        .unwrap_or("default")
                )),
                other => other,
            })?;
        self.calendar
            .create_event(&access_token, cal, &self.config.calendar_id)
            .await
    }

    async fn send_hr_request(&self, hr: &payload::HrPayload) -> Result<Value> {
        if self.config.hr_provider == "mock" {
            return Ok(serde_json::json!({
                "request_id": provider_id("hr"),
                "status": "submitted",
            }));
        }
        let url = self
            .config
            .hr_api_url
            .as_deref()
            .ok_or_else(|| Error::integration("hr", "HR API URL is not configured"))?;
        let response = self.http.post(url).json(hr).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::integration_status("hr", status.as_u16(), body));
        }
        Ok(serde_json::from_str(&body)
            .unwrap_or_else(|_| serde_json::json!({ "status": "accepted", "raw": body })))
    }

    /// Default scheduling window when the payload names no times: this hour
    /// tomorrow (UTC), for one hour.
    pub fn default_window(&self) -> (String, String) {
        let now = Utc::now();
        let start = now.checked_add_signed(Duration::days(1)).unwrap_or(now);
        let end = start.checked_add_signed(Duration::hours(1)).unwrap_or(start);
        (start.to_rfc3339(), end.to_rfc3339())
    }
}

/// Mint a 10-hex provider-side id (`mail-…`, `cal-…`, `hr-…`).
fn provider_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &hex[..10])
}
