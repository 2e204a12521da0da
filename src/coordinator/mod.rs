//! HITL coordinator: the durable approval state machine.
//!
//! Owns the transition graph
//! `drafted → approval_pending → {approved, rejected}`,
//! `approved → executing → {executed, failed}`, with steer returning a
//! pending thread to `drafted` under a fresh approval request id.
//!
//! Every operation is a read-modify-write over the thread's checkpoint row
//! plus its action row inside one transaction: load, short-circuit on the
//! idempotency set or a settled status, apply the state change, append the
//! audit event, commit. External calls (chat posts, provider dispatch) run
//! after the commit under the just-minted correlation ids, and their
//! terminal outcomes are recorded in a second transaction — duplicate
//! deliveries collapse onto the first recorded result.

pub mod metadata;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::calendar::{is_known_zone, zone_or_default};
use crate::chat::{ChatGateway, ChatHandle};
use crate::config::ExecutorConfig;
use crate::db::{actions, checkpoints};
use crate::error::{Error, Result};
use crate::executor::payload::{extract_payload_from_draft, CalendarPayload};
use crate::executor::ExternalActionExecutor;
use crate::types::{short_id, thread_id_for_action, ActionKind, ActionRow, ThreadStatus};
use metadata::{
    AuditEvent, AuditEventType, TentativeHold, ThreadMetadata, ThreadState, OP_APPROVE,
    OP_REJECT, OP_REQUEST_APPROVAL, OP_STEER,
};

/// Result of `request_approval` and `apply_steer`.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalResult {
    /// Durable thread id.
    pub thread_id: String,
    /// The open approval request.
    pub approval_request_id: String,
    /// Thread status after the operation.
    pub status: ThreadStatus,
    /// Owning action.
    pub action_id: i64,
    /// Where the prompt lives, when chat delivery succeeded.
    pub chat: Option<ChatHandle>,
}

/// Result of `approve` and `process_execution_job`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionJobResult {
    /// Execution job id.
    pub job_id: String,
    /// Thread status after the operation.
    pub status: ThreadStatus,
    /// Durable thread id.
    pub thread_id: String,
    /// Owning action.
    pub action_id: i64,
}

/// One row of the operator history view.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    /// Durable thread id.
    pub thread_id: String,
    /// Owning action (0 when the state never recorded one).
    pub action_id: i64,
    /// Current status.
    pub status: Option<ThreadStatus>,
    /// Truncated draft text.
    pub summary: String,
    /// Planner project tag.
    pub project_id: Option<String>,
    /// Planner severity tag.
    pub severity: Option<String>,
    /// Timestamp of the latest audit event.
    pub updated_at: String,
    /// Full audit trail.
    pub events: Vec<AuditEvent>,
}

/// Filters for [`Coordinator::fetch_history`].
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Only threads in this status.
    pub status: Option<ThreadStatus>,
    /// Only threads tagged with this project.
    pub project_id: Option<String>,
    /// Maximum rows returned.
    pub limit: usize,
}

/// The approval state machine over checkpoint store, chat gateway, and
/// executor.
pub struct Coordinator {
    pool: SqlitePool,
    chat: Arc<ChatGateway>,
    executor: Arc<ExternalActionExecutor>,
}

impl Coordinator {
    /// Wire a coordinator over its collaborators.
    pub fn new(
        pool: SqlitePool,
        chat: Arc<ChatGateway>,
        executor: Arc<ExternalActionExecutor>,
    ) -> Self {
        Self {
            pool,
            chat,
            executor,
        }
    }

    /// The pool this coordinator persists into.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── request_approval ────────────────────────────────────────

    /// Open (or re-deliver) an approval request for an action.
    ///
    /// Short-circuits when the thread is already pending with an open
    /// request, or when the idempotency key was seen before. Otherwise mints
    /// a new `approval_request_id`, persists the pending state, posts the
    /// chat prompt, and — for calendar actions — places a tentative hold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the action does not exist.
    pub async fn request_approval(
        &self,
        action_id: i64,
        requested_by: Option<&str>,
        idempotency_key: Option<&str>,
        summary: Option<&str>,
    ) -> Result<ApprovalResult> {
        let thread_id = thread_id_for_action(action_id);

        let mut tx = self.pool.begin().await?;
        let action = actions::load_action(&mut tx, action_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("action {action_id}")))?;

        let row = checkpoints::load(&mut tx, &thread_id).await?;
        let mut state: ThreadState = match &row {
            Some(row) => row.state()?,
            None => ThreadState::default(),
        };
        let mut meta: ThreadMetadata = match &row {
            Some(row) => row.metadata()?,
            None => ThreadMetadata::default(),
        };

        // A pending thread with an open request is returned unchanged; the
        // prompt is not re-posted.
        if meta.status == Some(ThreadStatus::ApprovalPending) && meta.approval_request_id.is_some()
        {
            return Ok(approval_result_from(&thread_id, action_id, &meta));
        }
        if meta.idempotency_seen(OP_REQUEST_APPROVAL, idempotency_key)
            && meta.approval_request_id.is_some()
        {
            return Ok(approval_result_from(&thread_id, action_id, &meta));
        }

        let approval_request_id = short_id("apr");
        meta.approval_request_id = Some(approval_request_id.clone());
        meta.status = Some(ThreadStatus::ApprovalPending);
        meta.requested_by = requested_by.map(str::to_owned);
        meta.requested_at = Some(Utc::now().to_rfc3339());
        meta.record_idempotency_key(OP_REQUEST_APPROVAL, idempotency_key);
        meta.append_audit(
            AuditEventType::ApprovalRequested,
            requested_by,
            Some(&approval_request_id),
            json!({ "action_id": action_id, "summary": summary }),
        );

        state.thread_id = Some(thread_id.clone());
        state.action_id = Some(action_id);
        state.proposal_id = action.proposal_id;
        state.draft = action.draft_content.clone();

        checkpoints::upsert(&mut tx, &thread_id, &state, &meta).await?;
        checkpoints::index_approval(&mut tx, &approval_request_id, &thread_id).await?;
        actions::update_status(&mut tx, action_id, ThreadStatus::ApprovalPending, false).await?;
        tx.commit().await?;

        info!(%thread_id, action_id, %approval_request_id, "approval requested");

        // Side effects after the commit, keyed by the minted request id.
        let prior = meta.chat.clone();
        let chat_handle = self
            .chat
            .send_approval_prompt(
                action_id,
                &approval_request_id,
                &thread_id,
                summary,
                action.draft_content.as_deref(),
                prior.as_ref(),
            )
            .await;

        let hold = if action.action_type == ActionKind::CalendarBooking {
            self.place_tentative_hold(action_id, &action, &meta).await
        } else {
            None
        };

        if chat_handle.is_some() || hold.is_some() {
            self.record_request_side_effects(&thread_id, chat_handle.as_ref(), hold)
                .await?;
        }

        Ok(ApprovalResult {
            thread_id,
            approval_request_id,
            status: ThreadStatus::ApprovalPending,
            action_id,
            chat: chat_handle.or(prior),
        })
    }

    /// Merge freshly observed side-effect outcomes into the checkpoint.
    async fn record_request_side_effects(
        &self,
        thread_id: &str,
        chat_handle: Option<&ChatHandle>,
        hold: Option<TentativeHold>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        if let Some(row) = checkpoints::load(&mut tx, thread_id).await? {
            let mut meta: ThreadMetadata = row.metadata()?;
            let state: ThreadState = row.state()?;
            if let Some(handle) = chat_handle {
                meta.chat = Some(handle.clone());
            }
            if let Some(hold) = hold {
                meta.tentative_calendar = Some(hold);
            }
            checkpoints::upsert(&mut tx, thread_id, &state, &meta).await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Attempt the tentative hold for a calendar action.
    ///
    /// Returns `None` when an earlier hold already exists; otherwise a hold
    /// record in `created` or `failed` state. Failure never propagates.
    async fn place_tentative_hold(
        &self,
        action_id: i64,
        action: &ActionRow,
        meta: &ThreadMetadata,
    ) -> Option<TentativeHold> {
        if let Some(existing) = &meta.tentative_calendar {
            if existing.status == "created" {
                return None;
            }
        }

        let (payload, mut hold) = build_tentative_hold(
            action_id,
            action.draft_content.as_deref(),
            self.executor.config(),
        );

        let outcome = match self.pool.acquire().await {
            Ok(mut conn) => self.executor.create_calendar_event(&mut conn, &payload).await,
            Err(e) => Err(Error::Database(e)),
        };
        match outcome {
            Ok(response) => {
                hold.status = "created".to_owned();
                hold.event_id = response
                    .get("id")
                    .or_else(|| response.get("event_id"))
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                hold.html_link = response
                    .get("htmlLink")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
            }
            Err(e) => {
                hold.status = "failed".to_owned();
                hold.error = Some(e.to_string());
                warn!(action_id, error = %e, "tentative calendar hold failed");
            }
        }
        Some(hold)
    }

    // ── approve ─────────────────────────────────────────────────

    /// Record a human approval and drive execution.
    ///
    /// Duplicate approvals — by recorded execution state, action status, or
    /// idempotency key — return the cached result without re-executing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no thread holds the approval request.
    pub async fn approve(
        &self,
        approval_request_id: &str,
        actor: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<ExecutionJobResult> {
        let mut tx = self.pool.begin().await?;
        let thread_id = checkpoints::find_thread_by_approval(&mut tx, approval_request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval request {approval_request_id}")))?;
        let row = checkpoints::load(&mut tx, &thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {thread_id}")))?;
        let mut meta: ThreadMetadata = row.metadata()?;
        let state: ThreadState = row.state()?;
        let action_id = state
            .action_id
            .ok_or_else(|| Error::NotFound(format!("action for thread {thread_id}")))?;

        if let Some(status) = meta.execution_outcome() {
            return Ok(job_result(&meta, &thread_id, action_id, status));
        }
        let action = actions::load_action(&mut tx, action_id).await?;
        if let Some(action) = &action {
            if action.status.is_execution_settled() {
                return Ok(job_result(&meta, &thread_id, action_id, action.status));
            }
        }
        if meta.idempotency_seen(OP_APPROVE, idempotency_key) {
            let status = meta
                .execution_status
                .or(meta.status)
                .unwrap_or(ThreadStatus::Approved);
            return Ok(job_result(&meta, &thread_id, action_id, status));
        }
        if meta.approval_request_id.as_deref() != Some(approval_request_id) {
            return Err(Error::Conflict(format!(
                "approval request {approval_request_id} was superseded by a steer"
            )));
        }

        meta.record_idempotency_key(OP_APPROVE, idempotency_key);
        meta.status = Some(ThreadStatus::Approved);
        meta.append_audit(
            AuditEventType::ApprovalApproved,
            actor,
            Some(approval_request_id),
            json!({ "action_id": action_id }),
        );
        checkpoints::upsert(&mut tx, &thread_id, &state, &meta).await?;
        actions::update_status(&mut tx, action_id, ThreadStatus::Approved, true).await?;
        tx.commit().await?;

        info!(%thread_id, action_id, approval_request_id, "approval approved");

        self.process_execution_job(action_id, false, None).await
    }

    // ── reject ──────────────────────────────────────────────────

    /// Record a human rejection. Idempotent by key and by recorded status;
    /// no executor invocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no thread holds the approval request
    /// and [`Error::Conflict`] when execution already started.
    pub async fn reject(
        &self,
        approval_request_id: &str,
        actor: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let thread_id = checkpoints::find_thread_by_approval(&mut tx, approval_request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval request {approval_request_id}")))?;
        let row = checkpoints::load(&mut tx, &thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {thread_id}")))?;
        let mut meta: ThreadMetadata = row.metadata()?;
        let state: ThreadState = row.state()?;

        if meta.idempotency_seen(OP_REJECT, idempotency_key)
            || meta.status == Some(ThreadStatus::Rejected)
        {
            return Ok(());
        }
        if let Some(outcome) = meta.execution_outcome() {
            return Err(Error::Conflict(format!(
                "cannot reject thread {thread_id} after execution ({outcome})"
            )));
        }
        if meta.approval_request_id.as_deref() != Some(approval_request_id) {
            return Err(Error::Conflict(format!(
                "approval request {approval_request_id} was superseded by a steer"
            )));
        }

        let action_id = state.action_id.unwrap_or(0);
        meta.record_idempotency_key(OP_REJECT, idempotency_key);
        meta.status = Some(ThreadStatus::Rejected);
        meta.append_audit(
            AuditEventType::ApprovalRejected,
            actor,
            Some(approval_request_id),
            json!({ "action_id": action_id }),
        );
        checkpoints::upsert(&mut tx, &thread_id, &state, &meta).await?;
        if action_id > 0 {
            actions::update_status(&mut tx, action_id, ThreadStatus::Rejected, false).await?;
        }
        tx.commit().await?;

        info!(%thread_id, action_id, approval_request_id, "approval rejected");
        Ok(())
    }

    // ── steer ───────────────────────────────────────────────────

    /// Amend the draft with human feedback and re-request approval.
    ///
    /// The draft gains `[Steer] <feedback>` (and `[Plan] <plan>` when one
    /// was chosen), the thread returns to `drafted`, and a new approval
    /// request supersedes the prior one under a derived idempotency key so
    /// duplicate steer submissions are absorbed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown approval request and
    /// [`Error::Conflict`] when execution already started.
    pub async fn apply_steer(
        &self,
        approval_request_id: &str,
        actor: Option<&str>,
        feedback: &str,
        selected_plan: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<ApprovalResult> {
        let mut tx = self.pool.begin().await?;
        let thread_id = checkpoints::find_thread_by_approval(&mut tx, approval_request_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval request {approval_request_id}")))?;
        let row = checkpoints::load(&mut tx, &thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {thread_id}")))?;
        let mut meta: ThreadMetadata = row.metadata()?;
        let mut state: ThreadState = row.state()?;
        let action_id = state
            .action_id
            .ok_or_else(|| Error::NotFound(format!("action for thread {thread_id}")))?;

        if meta.idempotency_seen(OP_STEER, idempotency_key) {
            return Ok(approval_result_from(&thread_id, action_id, &meta));
        }
        if let Some(outcome) = meta.execution_outcome() {
            return Err(Error::Conflict(format!(
                "cannot steer thread {thread_id} after execution ({outcome})"
            )));
        }
        if meta.approval_request_id.as_deref() != Some(approval_request_id) {
            return Err(Error::Conflict(format!(
                "approval request {approval_request_id} was superseded by a steer"
            )));
        }

        meta.record_idempotency_key(OP_STEER, idempotency_key);

        let action = actions::load_action(&mut tx, action_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("action {action_id}")))?;
        let draft = action.draft_content.unwrap_or_default();
        let plan_line = selected_plan
            .map(|plan| format!("\n[Plan] {plan}"))
            .unwrap_or_default();
        let updated_draft = format!("{draft}\n\n[Steer] {feedback}{plan_line}")
            .trim()
            .to_owned();
        actions::update_draft(&mut tx, action_id, &updated_draft, ThreadStatus::Drafted).await?;

        state.draft = Some(updated_draft);
        state.feedback = Some(feedback.to_owned());
        state.selected_plan = selected_plan.map(str::to_owned);
        meta.status = Some(ThreadStatus::Drafted);
        meta.append_audit(
            AuditEventType::HumanFeedbackReceived,
            actor,
            Some(approval_request_id),
            json!({ "feedback": feedback, "selected_plan": selected_plan }),
        );
        checkpoints::upsert(&mut tx, &thread_id, &state, &meta).await?;
        tx.commit().await?;

        info!(%thread_id, action_id, approval_request_id, "steer applied");

        // The derived key absorbs duplicate steer submissions at re-request.
        let derived_key = format!("{thread_id}:{approval_request_id}:steer");
        self.request_approval(action_id, actor, Some(&derived_key), Some("steer update"))
            .await
    }

    // ── execution ───────────────────────────────────────────────

    /// Drive the executor for an approved action.
    ///
    /// Short-circuits when execution already started or finished. Otherwise
    /// transitions to `executing`, commits, invokes the executor, records
    /// the terminal outcome in a second transaction, and posts a thread
    /// notification naming the job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a missing action. Provider failures
    /// are absorbed into the `failed` outcome, not returned.
    pub async fn process_execution_job(
        &self,
        action_id: i64,
        simulate_failure: bool,
        payload_override: Option<Map<String, Value>>,
    ) -> Result<ExecutionJobResult> {
        let thread_id = thread_id_for_action(action_id);

        let mut tx = self.pool.begin().await?;
        let row = checkpoints::load(&mut tx, &thread_id).await?;
        let mut meta: ThreadMetadata = match &row {
            Some(row) => row.metadata()?,
            None => ThreadMetadata::default(),
        };
        let mut state: ThreadState = match &row {
            Some(row) => row.state()?,
            None => ThreadState::default(),
        };

        if let Some(status) = meta.execution_outcome() {
            return Ok(job_result(&meta, &thread_id, action_id, status));
        }
        let action = actions::load_action(&mut tx, action_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("action {action_id}")))?;
        if action.status.is_execution_settled() {
            return Ok(job_result(&meta, &thread_id, action_id, action.status));
        }

        let job_id = short_id("job");
        state.thread_id.get_or_insert_with(|| thread_id.clone());
        state.action_id.get_or_insert(action_id);
        meta.status = Some(ThreadStatus::Executing);
        meta.execution_job_id = Some(job_id.clone());
        meta.execution_status = Some(ThreadStatus::Executing);
        meta.append_audit(
            AuditEventType::ExecutionStarted,
            Some("worker"),
            Some(&job_id),
            json!({ "action_id": action_id }),
        );
        checkpoints::upsert(&mut tx, &thread_id, &state, &meta).await?;
        actions::update_status_only(&mut tx, action_id, ThreadStatus::Executing).await?;
        tx.commit().await?;

        // Provider dispatch outside the transaction, keyed by the job id.
        let outcome = if simulate_failure {
            Err(Error::integration("simulated", "simulated failure"))
        } else {
            match self.pool.acquire().await {
                Ok(mut conn) => {
                    self.executor
                        .execute(&mut conn, &job_id, action_id, payload_override)
                        .await
                }
                Err(e) => return Err(Error::Database(e)),
            }
        };
        let failure = match outcome {
            Ok(_) => None,
            Err(
                e @ (Error::Integration { .. }
                | Error::Credential(_)
                | Error::Invalid(_)
                | Error::NotFound(_)),
            ) => Some(e.to_string()),
            Err(other) => return Err(other),
        };

        let final_status = match failure {
            None => ThreadStatus::Executed,
            Some(_) => ThreadStatus::Failed,
        };

        // Record the terminal outcome against fresh row contents.
        let mut tx = self.pool.begin().await?;
        let row = checkpoints::load(&mut tx, &thread_id).await?;
        let mut meta: ThreadMetadata = match &row {
            Some(row) => row.metadata()?,
            None => meta,
        };
        let state: ThreadState = match &row {
            Some(row) => row.state()?,
            None => state,
        };
        meta.status = Some(final_status);
        meta.execution_status = Some(final_status);
        match &failure {
            None => meta.append_audit(
                AuditEventType::ExecutionSucceeded,
                Some("worker"),
                Some(&job_id),
                json!({ "action_id": action_id }),
            ),
            Some(error) => meta.append_audit(
                AuditEventType::ExecutionFailed,
                Some("worker"),
                Some(&job_id),
                json!({ "action_id": action_id, "error": error }),
            ),
        }
        checkpoints::upsert(&mut tx, &thread_id, &state, &meta).await?;
        actions::update_status_only(&mut tx, action_id, final_status).await?;
        tx.commit().await?;

        if let Some(handle) = &meta.chat {
            let text = match &failure {
                None => format!("Execution completed. job_id={job_id} action_id={action_id}"),
                Some(error) => {
                    format!("Execution failed. job_id={job_id} action_id={action_id} error={error}")
                }
            };
            self.chat
                .post_thread_message(&handle.channel, handle.reply_thread(), &text)
                .await;
        }

        match &failure {
            None => info!(%thread_id, action_id, %job_id, "execution succeeded"),
            Some(error) => {
                warn!(%thread_id, action_id, %job_id, error = %error, "execution failed");
            }
        }

        Ok(ExecutionJobResult {
            job_id,
            status: final_status,
            thread_id,
            action_id,
        })
    }

    // ── read surfaces ───────────────────────────────────────────

    /// The ordered audit trail of a thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown thread.
    pub async fn fetch_audit_logs(&self, thread_id: &str) -> Result<Vec<AuditEvent>> {
        let mut conn = self.pool.acquire().await?;
        let row = checkpoints::load(&mut conn, thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {thread_id}")))?;
        let meta: ThreadMetadata = row.metadata()?;
        Ok(meta.audit_events)
    }

    /// Thread summaries for operator review, most recently updated first.
    ///
    /// Demo threads (`demo:` prefix) share the table but are excluded here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on query failure.
    pub async fn fetch_history(&self, filter: &HistoryFilter) -> Result<Vec<ThreadSummary>> {
        let mut conn = self.pool.acquire().await?;
        let rows = checkpoints::list_all(&mut conn).await?;
        let mut results = Vec::new();
        for row in rows {
            if row.thread_id.starts_with("demo:") {
                continue;
            }
            let Ok(meta) = row.metadata::<ThreadMetadata>() else {
                continue;
            };
            if let Some(project_id) = filter.project_id.as_deref() {
                if meta.project_id.as_deref() != Some(project_id) {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if meta.status != Some(status) {
                    continue;
                }
            }

            let state: ThreadState = row.state().unwrap_or_default();
            let action_id = state.action_id.unwrap_or(0);
            let action = if action_id > 0 {
                actions::load_action(&mut conn, action_id).await?
            } else {
                None
            };
            let summary = truncate_summary(
                action
                    .as_ref()
                    .and_then(|a| a.draft_content.as_deref())
                    .unwrap_or(""),
            );
            let status = meta.status.or(action.as_ref().map(|a| a.status));
            let updated_at = meta.last_updated_at().unwrap_or("").to_owned();
            results.push(ThreadSummary {
                thread_id: row.thread_id,
                action_id,
                status,
                summary,
                project_id: meta.project_id.clone(),
                severity: meta.severity.clone(),
                updated_at,
                events: meta.audit_events,
            });
        }
        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if filter.limit > 0 {
            results.truncate(filter.limit);
        }
        Ok(results)
    }

    /// Resolve the open approval request of the thread a chat message was
    /// posted in, by its channel thread timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] on query failure.
    pub async fn find_approval_by_chat_thread(&self, thread_ts: &str) -> Result<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        let rows = checkpoints::list_all(&mut conn).await?;
        for row in rows {
            let Some(raw) = row.metadata.as_deref() else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(raw) else {
                continue;
            };
            let chat = value.get("slack");
            let matches = chat
                .map(|chat| {
                    chat.get("thread_ts").and_then(Value::as_str) == Some(thread_ts)
                        || chat.get("message_ts").and_then(Value::as_str) == Some(thread_ts)
                })
                .unwrap_or(false);
            if matches {
                if let Some(approval) = value
                    .get("approval_request_id")
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                {
                    return Ok(Some(approval.to_owned()));
                }
            }
        }
        Ok(None)
    }

    /// Tag a thread's metadata with planner fields (watchdog intake).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown thread.
    pub async fn tag_thread(
        &self,
        thread_id: &str,
        mode: &str,
        project_id: &str,
        severity: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = checkpoints::load(&mut tx, thread_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("thread {thread_id}")))?;
        let mut meta: ThreadMetadata = row.metadata()?;
        let state: ThreadState = row.state()?;
        meta.mode = Some(mode.to_owned());
        meta.project_id = Some(project_id.to_owned());
        meta.severity = Some(severity.to_owned());
        checkpoints::upsert(&mut tx, thread_id, &state, &meta).await?;
        tx.commit().await?;
        Ok(())
    }
}

// ── helpers ─────────────────────────────────────────────────────

fn approval_result_from(thread_id: &str, action_id: i64, meta: &ThreadMetadata) -> ApprovalResult {
    ApprovalResult {
        thread_id: thread_id.to_owned(),
        approval_request_id: meta.approval_request_id.clone().unwrap_or_default(),
        status: meta.status.unwrap_or(ThreadStatus::ApprovalPending),
        action_id,
        chat: meta.chat.clone(),
    }
}

fn job_result(
    meta: &ThreadMetadata,
    thread_id: &str,
    action_id: i64,
    status: ThreadStatus,
) -> ExecutionJobResult {
    ExecutionJobResult {
        job_id: meta
            .execution_job_id
            .clone()
            .unwrap_or_else(|| format!("job-{action_id}")),
        status,
        thread_id: thread_id.to_owned(),
        action_id,
    }
}

fn truncate_summary(draft: &str) -> String {
    const LIMIT: usize = 160;
    if draft.chars().count() <= LIMIT {
        return draft.to_owned();
    }
    let cut: String = draft.chars().take(LIMIT).collect();
    format!("{cut}...")
}

/// Keep only zone names the IANA database knows; anything else falls back
/// to the configured default.
fn resolve_timezone_name(raw: Option<&str>, default: &str) -> String {
    let value = raw.map(str::trim).unwrap_or("");
    if !value.is_empty() && is_known_zone(value) {
        return value.to_owned();
    }
    default.to_owned()
}

/// Build the tentative-hold payload: the day after today, 18:00–19:00 in the
/// caller's timezone, titled with a `Tentative:` prefix.
pub(crate) fn build_tentative_hold(
    action_id: i64,
    draft_content: Option<&str>,
    config: &ExecutorConfig,
) -> (CalendarPayload, TentativeHold) {
    let raw = extract_payload_from_draft(draft_content);
    let get = |keys: &[&str]| {
        keys.iter()
            .filter_map(|key| raw.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(str::to_owned)
    };

    let timezone = resolve_timezone_name(
        raw.get("timezone").and_then(Value::as_str),
        &config.default_timezone,
    );

    // "Tomorrow" is a local notion: take the date boundary in the hold's
    // own zone, not the server's.
    let today = Utc::now()
        .with_timezone(&zone_or_default(&timezone))
        .date_naive();
    let next_day = today.succ_opt().unwrap_or(today);
    let start_at = format!("{}T18:00:00", next_day.format("%Y-%m-%d"));
    let end_at = format!("{}T19:00:00", next_day.format("%Y-%m-%d"));

    let mut title = get(&["title"]).unwrap_or_else(|| format!("Approval hold {action_id}"));
    if !title.to_lowercase().contains("tentative") {
        title = format!("Tentative: {title}");
    }

    const NOTE: &str = "Tentative hold created at approval request.";
    let base_description = get(&["description"]).unwrap_or_default();
    let description = if base_description.contains(NOTE) {
        base_description
    } else if base_description.is_empty() {
        NOTE.to_owned()
    } else {
        format!("{base_description}\n\n{NOTE}")
    };

    let attendee = get(&["attendee"]).unwrap_or_else(|| config.attendee_fallback().to_owned());

    let payload = CalendarPayload {
        attendee: attendee.clone(),
        attendees: Vec::new(),
        title: title.clone(),
        start_at: start_at.clone(),
        end_at: end_at.clone(),
        timezone: timezone.clone(),
        description: Some(description),
        meeting_url: get(&["meeting_url", "meetingUrl"]),
        owner_email: get(&["owner_email", "ownerEmail"]).or_else(|| config.default_owner_email.clone()),
        owner_user_id: get(&["owner_user_id", "ownerUserId"]),
        calendar_id: None,
    };
    let hold = TentativeHold {
        status: "pending".to_owned(),
        title,
        attendee,
        start_at,
        end_at,
        timezone,
        provider: config.calendar_provider.clone(),
        created_at: Utc::now().to_rfc3339(),
        event_id: None,
        html_link: None,
        error: None,
    };
    (payload, hold)
}
