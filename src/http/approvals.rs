//! Operator routes for the approval lifecycle.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::coordinator::{ApprovalResult, ExecutionJobResult, HistoryFilter, ThreadSummary};
use crate::db::actions;
use crate::error::Error;
use crate::types::{ActionKind, ThreadStatus};

/// Fallback actor for operator calls without an explicit one.
const OPERATOR_ACTOR: &str = "operator";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct RequestApprovalBody {
    requested_by: Option<String>,
    idempotency_key: Option<String>,
    summary: Option<String>,
}

/// `POST /v1/nemawashi/{action_id}/request-approval`
pub(super) async fn request_approval(
    State(state): State<AppState>,
    Path(action_id): Path<i64>,
    body: Option<Json<RequestApprovalBody>>,
) -> ApiResult<Json<ApprovalResult>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let requested_by = body.requested_by.as_deref().unwrap_or(OPERATOR_ACTOR);
    let result = state
        .coordinator
        .request_approval(
            action_id,
            Some(requested_by),
            body.idempotency_key.as_deref(),
            body.summary.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct DecisionBody {
    actor: Option<String>,
    idempotency_key: Option<String>,
}

/// `POST /v1/approvals/{approval_id}/approve`
pub(super) async fn approve(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    body: Option<Json<DecisionBody>>,
) -> ApiResult<Json<ExecutionJobResult>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = body.actor.as_deref().unwrap_or(OPERATOR_ACTOR);
    let result = state
        .coordinator
        .approve(&approval_id, Some(actor), body.idempotency_key.as_deref())
        .await?;
    Ok(Json(result))
}

/// `POST /v1/approvals/{approval_id}/reject`
pub(super) async fn reject(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    body: Option<Json<DecisionBody>>,
) -> ApiResult<Json<Value>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let actor = body.actor.as_deref().unwrap_or(OPERATOR_ACTOR);
    state
        .coordinator
        .reject(&approval_id, Some(actor), body.idempotency_key.as_deref())
        .await?;
    Ok(Json(json!({ "status": "rejected" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SteerBody {
    feedback: String,
    #[serde(default)]
    selected_plan: Option<String>,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    actor: Option<String>,
}

/// `POST /v1/approvals/{approval_id}/steer`
pub(super) async fn steer(
    State(state): State<AppState>,
    Path(approval_id): Path<String>,
    Json(body): Json<SteerBody>,
) -> ApiResult<Json<ApprovalResult>> {
    if body.feedback.trim().is_empty() {
        return Err(ApiError(Error::Invalid("feedback must not be empty".to_owned())));
    }
    let actor = body.actor.as_deref().unwrap_or(OPERATOR_ACTOR);
    let result = state
        .coordinator
        .apply_steer(
            &approval_id,
            Some(actor),
            &body.feedback,
            body.selected_plan.as_deref(),
            body.idempotency_key.as_deref(),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct CalendarExecuteBody {
    owner_email: Option<String>,
    owner_user_id: Option<String>,
    attendee: Option<String>,
    title: Option<String>,
    start_at: Option<String>,
    end_at: Option<String>,
    timezone: Option<String>,
    description: Option<String>,
    meeting_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct ExecuteBody {
    simulate_failure: bool,
    calendar: Option<CalendarExecuteBody>,
}

/// `POST /v1/nemawashi/{action_id}/execute`
pub(super) async fn execute(
    State(state): State<AppState>,
    Path(action_id): Path<i64>,
    body: Option<Json<ExecuteBody>>,
) -> ApiResult<Json<ExecutionJobResult>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let payload_override = body.calendar.map(|calendar| {
        let mut map = Map::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                map.insert(key.to_owned(), Value::String(value));
            }
        };
        put("owner_email", calendar.owner_email);
        put("owner_user_id", calendar.owner_user_id);
        put("attendee", calendar.attendee);
        put("title", calendar.title);
        put("start_at", calendar.start_at);
        put("end_at", calendar.end_at);
        put("timezone", calendar.timezone);
        put("description", calendar.description);
        put("meeting_url", calendar.meeting_url);
        map
    });
    let result = state
        .coordinator
        .process_execution_job(action_id, body.simulate_failure, payload_override)
        .await?;
    Ok(Json(result))
}

/// `GET /v1/audit/{thread_id}`
pub(super) async fn audit(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let events = state.coordinator.fetch_audit_logs(&thread_id).await?;
    Ok(Json(json!({ "thread_id": thread_id, "events": events })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct HistoryQuery {
    status: Option<String>,
    project_id: Option<String>,
    limit: Option<usize>,
}

/// `GET /v1/history`
pub(super) async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ThreadSummary>>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            ThreadStatus::parse(raw)
                .ok_or_else(|| ApiError(Error::Invalid(format!("unknown status `{raw}`"))))?,
        ),
    };
    let filter = HistoryFilter {
        status,
        project_id: query.project_id.filter(|p| !p.is_empty()),
        limit: query.limit.unwrap_or(50),
    };
    let results = state.coordinator.fetch_history(&filter).await?;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateActionBody {
    action_type: String,
    draft_content: String,
    #[serde(default)]
    proposal_id: Option<i64>,
}

/// `POST /v1/actions` — intake for machine-drafted actions.
pub(super) async fn create_action(
    State(state): State<AppState>,
    Json(body): Json<CreateActionBody>,
) -> ApiResult<Json<Value>> {
    let kind = ActionKind::parse(&body.action_type).ok_or_else(|| {
        ApiError(Error::Invalid(format!(
            "unknown action type `{}`",
            body.action_type
        )))
    })?;
    let mut conn = state.pool.acquire().await.map_err(Error::Database)?;
    let action_id =
        actions::insert_action(&mut conn, kind, &body.draft_content, body.proposal_id).await?;
    Ok(Json(json!({ "action_id": action_id, "status": "drafted" })))
}
