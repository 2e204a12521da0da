//! Demo driver: a compressed approval machine for live demonstrations.
//!
//! States: `alerted → {plan_selected, intervened} → approval_pending →
//! approved → calendar_creating → {calendar_created, calendar_failed}`, plus
//! `rejected` and `cancelled`. Threads live in the shared checkpoint store
//! under a `demo:` prefix and follow the same idempotency discipline as
//! operational threads: terminal states absorb duplicate deliveries with a
//! thread notification instead of a second transition.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::calendar::zone_or_default;
use crate::chat::{ChatGateway, ChatHandle};
use crate::config::{ChatConfig, ExecutorConfig};
use crate::db::checkpoints;
use crate::error::{Error, Result};
use crate::executor::payload::CalendarPayload;
use crate::executor::ExternalActionExecutor;
use crate::types::short_id;

/// Demo thread status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoStatus {
    /// Synthetic alert posted, waiting for input.
    Alerted,
    /// A plan button was chosen.
    PlanSelected,
    /// Free-text intervention arrived.
    Intervened,
    /// Execution draft posted, awaiting approve/reject.
    ApprovalPending,
    /// Approved; booking not yet claimed.
    Approved,
    /// Rejected. Terminal.
    Rejected,
    /// Cancelled. Terminal.
    Cancelled,
    /// Calendar booking claimed by one approver.
    CalendarCreating,
    /// Booking done. Terminal.
    CalendarCreated,
    /// Booking failed; retry available.
    CalendarFailed,
}

impl DemoStatus {
    /// Stable string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alerted => "alerted",
            Self::PlanSelected => "plan_selected",
            Self::Intervened => "intervened",
            Self::ApprovalPending => "approval_pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::CalendarCreating => "calendar_creating",
            Self::CalendarCreated => "calendar_created",
            Self::CalendarFailed => "calendar_failed",
        }
    }
}

/// Booking progress stored inside the demo metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoCalendar {
    /// Booking-side status mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DemoStatus>,
    /// Who claimed the booking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    /// When the booking was claimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// Provider event id once created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Provider event link once created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_link: Option<String>,
    /// Failure detail for retry prompts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DemoCalendar {
    fn has_event(&self) -> bool {
        self.event_id.is_some() || self.event_link.is_some()
    }
}

/// Durable metadata of one demo thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoMetadata {
    /// Alert id the thread was started for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    /// Current machine state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DemoStatus>,
    /// Approval-side status mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<DemoStatus>,
    /// Who started the demo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    /// Display name of the starter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by_name: Option<String>,
    /// Calendar owner user id for credential resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_id: Option<String>,
    /// Calendar owner email for credential resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_email: Option<String>,
    /// Selected plan (`A`/`B`/`C`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Who selected the plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_selected_by: Option<String>,
    /// Free-text intervention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention: Option<String>,
    /// Who intervened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention_by: Option<String>,
    /// Who approved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    /// Who rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    /// Who cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<String>,
    /// Creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Last mutation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Observed idempotency keys, each stored scoped to its operation
    /// family (`approve:K1`).
    pub idempotency_keys: Vec<String>,
    /// Where the demo conversation lives.
    #[serde(rename = "slack", skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatHandle>,
    /// Booking progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar: Option<DemoCalendar>,
}

fn scoped_key(operation: &str, key: &str) -> String {
    format!("{operation}:{key}")
}

impl DemoMetadata {
    /// Keys are scoped to the acting operation so one literal key reused
    /// across, say, `select_plan` and `approve` never collides.
    fn idempotency_seen(&self, operation: &str, key: Option<&str>) -> bool {
        match key {
            Some(key) if !key.is_empty() => {
                let scoped = scoped_key(operation, key);
                self.idempotency_keys.iter().any(|k| *k == scoped)
            }
            _ => false,
        }
    }

    fn record_idempotency_key(&mut self, operation: &str, key: Option<&str>) {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return;
        };
        let scoped = scoped_key(operation, key);
        if !self.idempotency_keys.iter().any(|k| *k == scoped) {
            self.idempotency_keys.push(scoped);
        }
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now().to_rfc3339());
    }

    fn is_settled(&self) -> bool {
        matches!(
            self.status,
            Some(DemoStatus::Approved)
                | Some(DemoStatus::CalendarCreating)
                | Some(DemoStatus::CalendarCreated)
        )
    }

    fn is_closed(&self) -> bool {
        matches!(
            self.status,
            Some(DemoStatus::Rejected) | Some(DemoStatus::Cancelled)
        )
    }
}

/// Result of starting a demo.
#[derive(Debug, Clone, Serialize)]
pub struct DemoStartResult {
    /// Minted alert id.
    pub alert_id: String,
    /// Initial status (`alerted`).
    pub status: DemoStatus,
    /// Where the alert was posted.
    pub chat: Option<ChatHandle>,
}

/// The demo intake channel over the shared checkpoint store.
pub struct DemoDriver {
    pool: SqlitePool,
    chat: Arc<ChatGateway>,
    executor: Arc<ExternalActionExecutor>,
    approver_user_ids: Vec<String>,
    executor_config: ExecutorConfig,
}

fn demo_thread_id(alert_id: &str) -> String {
    format!("demo:{alert_id}")
}

impl DemoDriver {
    /// Wire the driver over its collaborators.
    pub fn new(
        pool: SqlitePool,
        chat: Arc<ChatGateway>,
        executor: Arc<ExternalActionExecutor>,
        chat_config: &ChatConfig,
        executor_config: ExecutorConfig,
    ) -> Self {
        Self {
            pool,
            chat,
            executor,
            approver_user_ids: chat_config.approver_user_ids.clone(),
            executor_config,
        }
    }

    /// Start a demo: mint an alert id, post the alert, persist the thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Integration`] when the alert could not be posted —
    /// a demo without a chat thread has no input surface.
    pub async fn start(
        &self,
        requested_by: &str,
        requested_by_name: Option<&str>,
    ) -> Result<DemoStartResult> {
        let alert_id = short_id("alert");
        let chat_handle = self
            .chat
            .post_demo_alert(&alert_id)
            .await
            .ok_or_else(|| Error::integration("slack", "demo alert post failed"))?;

        let metadata = DemoMetadata {
            alert_id: Some(alert_id.clone()),
            status: Some(DemoStatus::Alerted),
            requested_by: Some(requested_by.to_owned()),
            requested_by_name: requested_by_name.map(str::to_owned),
            owner_user_id: Some(requested_by.to_owned()),
            owner_email: self.executor_config.default_owner_email.clone(),
            created_at: Some(Utc::now().to_rfc3339()),
            chat: Some(chat_handle.clone()),
            ..DemoMetadata::default()
        };
        self.persist(&alert_id, &metadata).await?;
        info!(%alert_id, requested_by, "demo started");
        Ok(DemoStartResult {
            alert_id,
            status: DemoStatus::Alerted,
            chat: Some(chat_handle),
        })
    }

    /// Record a plan selection and post the execution draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure; unknown alerts and
    /// invalid plans are absorbed with a warning (chat-edge semantics).
    pub async fn select_plan(
        &self,
        alert_id: &str,
        actor: Option<&str>,
        plan: &str,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let Some(mut metadata) = self.load(alert_id).await? else {
            warn!(alert_id, "demo plan selection ignored (unknown alert)");
            return Ok(());
        };
        if metadata.idempotency_seen("select_plan", idempotency_key) {
            return Ok(());
        }
        metadata.record_idempotency_key("select_plan", idempotency_key);

        let Some(normalized) = normalize_plan(plan) else {
            warn!(alert_id, plan, "demo plan selection invalid");
            return Ok(());
        };
        if metadata.is_closed() {
            self.notify(&metadata, "すでに終了しています。新しいデモを開始してください。")
                .await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        if metadata.is_settled() {
            self.notify(&metadata, "すでにApprove済みです。").await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }

        metadata.plan = Some(normalized);
        metadata.plan_selected_by = actor.map(str::to_owned);
        metadata.status = Some(DemoStatus::ApprovalPending);
        metadata.approval_status = Some(DemoStatus::ApprovalPending);
        metadata.touch();
        self.persist(alert_id, &metadata).await?;

        self.post_draft_prompt(alert_id, &metadata).await;
        Ok(())
    }

    /// Record a free-text intervention and post the execution draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn intervene(
        &self,
        alert_id: &str,
        actor: Option<&str>,
        intervention: &str,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let Some(mut metadata) = self.load(alert_id).await? else {
            warn!(alert_id, "demo intervention ignored (unknown alert)");
            return Ok(());
        };
        if metadata.idempotency_seen("intervene", idempotency_key) {
            return Ok(());
        }
        metadata.record_idempotency_key("intervene", idempotency_key);

        if metadata.is_settled() {
            self.notify(&metadata, "すでにApprove済みです。").await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        if metadata.is_closed() {
            self.notify(&metadata, "すでに終了しています。新しいデモを開始してください。")
                .await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }

        let trimmed = intervention.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        metadata.intervention = Some(trimmed.to_owned());
        metadata.intervention_by = actor.map(str::to_owned);
        metadata.status = Some(DemoStatus::ApprovalPending);
        metadata.approval_status = Some(DemoStatus::ApprovalPending);
        metadata.touch();
        self.persist(alert_id, &metadata).await?;

        self.post_draft_prompt(alert_id, &metadata).await;
        Ok(())
    }

    /// Approve: claim the booking, create the event, record the outcome.
    ///
    /// The claim (`calendar_creating`) is persisted before the provider call
    /// so a concurrent approve observes it and backs off; the terminal state
    /// is recorded afterwards with duplicate-event guards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure. Booking failures become
    /// the `calendar_failed` state with a retry prompt, not an error.
    pub async fn approve(
        &self,
        alert_id: &str,
        actor: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        // Phase 1: claim.
        let Some(mut metadata) = self.load(alert_id).await? else {
            warn!(alert_id, "demo approve ignored (unknown alert)");
            return Ok(());
        };
        if metadata.idempotency_seen("approve", idempotency_key) {
            return Ok(());
        }
        metadata.record_idempotency_key("approve", idempotency_key);

        if metadata.is_closed() {
            self.notify(
                &metadata,
                "すでにReject/Cancelされています。新しいデモを開始してください。",
            )
            .await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        if !self.actor_allowed(actor) {
            self.notify(&metadata, "Approve権限がありません。").await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        let calendar = metadata.calendar.clone().unwrap_or_default();
        if calendar.has_event() {
            self.notify(&metadata, "すでにカレンダー登録済みです。").await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        if metadata.status == Some(DemoStatus::CalendarCreating)
            || calendar.status == Some(DemoStatus::CalendarCreating)
        {
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }

        metadata.approval_status = Some(DemoStatus::Approved);
        metadata.approved_by = actor.map(str::to_owned);
        metadata.status = Some(DemoStatus::CalendarCreating);
        metadata.calendar = Some(DemoCalendar {
            status: Some(DemoStatus::CalendarCreating),
            started_by: actor.map(str::to_owned),
            started_at: Some(Utc::now().to_rfc3339()),
            ..calendar
        });
        metadata.touch();
        self.persist(alert_id, &metadata).await?;
        let claimed = metadata;

        // Phase 2: book against the claim.
        let outcome = self.create_demo_event(&claimed).await;
        match outcome {
            Err(e) => {
                let reason = e.to_string();
                if let Some(mut latest) = self.load(alert_id).await? {
                    let mut calendar = latest.calendar.clone().unwrap_or_default();
                    if calendar.has_event() {
                        return Ok(());
                    }
                    latest.status = Some(DemoStatus::CalendarFailed);
                    calendar.status = Some(DemoStatus::CalendarFailed);
                    calendar.error = Some(reason.clone());
                    latest.calendar = Some(calendar);
                    latest.touch();
                    self.persist(alert_id, &latest).await?;
                }
                if let Some(handle) = &claimed.chat {
                    self.chat
                        .post_demo_retry_prompt(
                            &handle.channel,
                            handle.reply_thread(),
                            alert_id,
                            &reason,
                        )
                        .await;
                }
                warn!(alert_id, error = %reason, "demo calendar booking failed");
                Ok(())
            }
            Ok(event) => {
                let event_id = event
                    .get("id")
                    .or_else(|| event.get("event_id"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
                let event_link = event
                    .get("htmlLink")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
                if let Some(mut latest) = self.load(alert_id).await? {
                    let mut calendar = latest.calendar.clone().unwrap_or_default();
                    if calendar.has_event() {
                        return Ok(());
                    }
                    latest.status = Some(DemoStatus::CalendarCreated);
                    calendar.status = Some(DemoStatus::CalendarCreated);
                    calendar.event_id = event_id.clone();
                    calendar.event_link = event_link.clone();
                    latest.calendar = Some(calendar);
                    latest.touch();
                    self.persist(alert_id, &latest).await?;
                }
                let message = self.success_message(event_link.as_deref(), event_id.as_deref());
                self.notify(&claimed, &message).await;
                info!(alert_id, "demo calendar booked");
                Ok(())
            }
        }
    }

    /// Reject the demo. Terminal unless already approved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn reject(
        &self,
        alert_id: &str,
        actor: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let Some(mut metadata) = self.load(alert_id).await? else {
            warn!(alert_id, "demo reject ignored (unknown alert)");
            return Ok(());
        };
        if metadata.idempotency_seen("reject", idempotency_key) {
            return Ok(());
        }
        metadata.record_idempotency_key("reject", idempotency_key);

        if metadata.is_settled() {
            self.notify(&metadata, "すでにApprove済みです。").await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        metadata.status = Some(DemoStatus::Rejected);
        metadata.approval_status = Some(DemoStatus::Rejected);
        metadata.rejected_by = actor.map(str::to_owned);
        metadata.touch();
        self.persist(alert_id, &metadata).await?;
        self.notify(&metadata, "Rejectされました。").await;
        Ok(())
    }

    /// Cancel the demo. Terminal unless already approved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on store failure.
    pub async fn cancel(
        &self,
        alert_id: &str,
        actor: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let Some(mut metadata) = self.load(alert_id).await? else {
            warn!(alert_id, "demo cancel ignored (unknown alert)");
            return Ok(());
        };
        if metadata.idempotency_seen("cancel", idempotency_key) {
            return Ok(());
        }
        metadata.record_idempotency_key("cancel", idempotency_key);

        if metadata.is_settled() {
            self.notify(&metadata, "すでにApprove済みです。").await;
            self.persist(alert_id, &metadata).await?;
            return Ok(());
        }
        metadata.status = Some(DemoStatus::Cancelled);
        metadata.approval_status = Some(DemoStatus::Cancelled);
        metadata.cancelled_by = actor.map(str::to_owned);
        metadata.touch();
        self.persist(alert_id, &metadata).await?;
        self.notify(&metadata, "キャンセルされました。").await;
        Ok(())
    }

    /// Load a demo thread's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on query failure.
    pub async fn load(&self, alert_id: &str) -> Result<Option<DemoMetadata>> {
        let mut conn = self.pool.acquire().await?;
        let row = checkpoints::load(&mut conn, &demo_thread_id(alert_id)).await?;
        match row {
            Some(row) => Ok(Some(row.metadata()?)),
            None => Ok(None),
        }
    }

    async fn persist(&self, alert_id: &str, metadata: &DemoMetadata) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let state = serde_json::json!({ "alert_id": alert_id });
        checkpoints::upsert(&mut conn, &demo_thread_id(alert_id), &state, metadata).await
    }

    async fn notify(&self, metadata: &DemoMetadata, text: &str) {
        if let Some(handle) = &metadata.chat {
            self.chat
                .post_thread_message(&handle.channel, handle.reply_thread(), text)
                .await;
        }
    }

    async fn post_draft_prompt(&self, alert_id: &str, metadata: &DemoMetadata) {
        let Some(handle) = &metadata.chat else {
            return;
        };
        let summary = self.draft_summary(metadata);
        self.chat
            .post_demo_approval_prompt(&handle.channel, handle.reply_thread(), &summary, alert_id)
            .await;
    }

    fn actor_allowed(&self, actor: Option<&str>) -> bool {
        if self.approver_user_ids.is_empty() {
            return true;
        }
        actor
            .map(|actor| self.approver_user_ids.iter().any(|id| id == actor))
            .unwrap_or(false)
    }

    fn invitees(&self) -> Vec<String> {
        if self.executor_config.demo_invitee_emails.is_empty() {
            vec![self.executor_config.attendee_fallback().to_owned()]
        } else {
            self.executor_config.demo_invitee_emails.clone()
        }
    }

    /// Tomorrow 18:00–18:30 local, as naive datetimes for the declared zone.
    fn schedule(&self) -> (String, String) {
        let zone = zone_or_default(&self.executor_config.default_timezone);
        let today = Utc::now().with_timezone(&zone).date_naive();
        let next_day = today.succ_opt().unwrap_or(today);
        (
            format!("{}T18:00:00", next_day.format("%Y-%m-%d")),
            format!("{}T18:30:00", next_day.format("%Y-%m-%d")),
        )
    }

    fn draft_summary(&self, metadata: &DemoMetadata) -> String {
        let schedule = format!("翌日 18:00 - 18:30 ({})", self.executor_config.default_timezone);
        let invitees = self.invitees().join(", ");
        let plan = metadata.plan.as_deref().unwrap_or("未選択");
        let intervention = metadata.intervention.as_deref().unwrap_or("なし");
        format!(
            "*実行ドラフト*\n- Plan: {plan}\n- 介入: {intervention}\n- 予定: {schedule}\n- 招待: {invitees}"
        )
    }

    fn success_message(&self, event_link: Option<&str>, event_id: Option<&str>) -> String {
        let (start_at, end_at) = self.schedule();
        let start_label = start_at.replace('T', " ");
        let end_label = end_at.split('T').nth(1).unwrap_or(&end_at).to_owned();
        let schedule = format!(
            "{} - {} ({})",
            start_label, end_label, self.executor_config.default_timezone
        );
        let invitees = self.invitees().join(", ");
        let link_line = match (event_link, event_id) {
            (Some(link), _) => format!("\nEvent: {link}"),
            (None, Some(id)) => format!("\nEvent ID: {id}"),
            (None, None) => String::new(),
        };
        format!("✅ Approve完了\n{schedule}\n招待: {invitees}{link_line}")
    }

    async fn create_demo_event(&self, metadata: &DemoMetadata) -> Result<serde_json::Value> {
        let (start_at, end_at) = self.schedule();
        let invitees = self.invitees();
        let mut title = "デモ（介入アラート）".to_owned();
        if let Some(plan) = metadata.plan.as_deref() {
            title = format!("{title} - Plan {plan}");
        }
        let mut description_parts = vec![format!(
            "Alert ID: {}",
            metadata.alert_id.as_deref().unwrap_or("")
        )];
        if let Some(plan) = metadata.plan.as_deref() {
            description_parts.push(format!("Plan: {plan}"));
        }
        if let Some(intervention) = metadata.intervention.as_deref() {
            description_parts.push(format!("Intervention: {intervention}"));
        }

        let payload = CalendarPayload {
            attendee: invitees
                .first()
                .cloned()
                .unwrap_or_else(|| self.executor_config.attendee_fallback().to_owned()),
            attendees: invitees,
            title,
            start_at,
            end_at,
            timezone: self.executor_config.default_timezone.clone(),
            description: Some(description_parts.join("\n")),
            meeting_url: None,
            owner_email: metadata.owner_email.clone(),
            owner_user_id: metadata.owner_user_id.clone(),
            calendar_id: Some(self.executor_config.calendar_id.clone()),
        };
        let mut conn = self.pool.acquire().await?;
        self.executor.create_calendar_event(&mut conn, &payload).await
    }
}

fn normalize_plan(plan: &str) -> Option<String> {
    let normalized = plan.trim().to_uppercase();
    match normalized.as_str() {
        "A" | "B" | "C" => Some(normalized),
        _ => None,
    }
}
