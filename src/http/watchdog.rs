//! Operator routes for the watchdog job queue.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use super::error::ApiResult;
use super::AppState;
use crate::error::Error;
use crate::watchdog::JobOutcome;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct RunBody {
    job_id: Option<i64>,
}

/// `POST /v1/watchdog/enqueue`
pub(super) async fn enqueue(State(state): State<AppState>) -> ApiResult<Json<JobOutcome>> {
    let outcome = state.watchdog.enqueue(serde_json::json!({})).await?;
    Ok(Json(outcome))
}

/// `POST /v1/watchdog/run`
///
/// Runs the given job, or the oldest queued one; when the queue is empty a
/// fresh job is enqueued and run immediately.
pub(super) async fn run(
    State(state): State<AppState>,
    body: Option<Json<RunBody>>,
) -> ApiResult<Json<JobOutcome>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let outcome = match state.watchdog.run_job(body.job_id).await {
        Ok(outcome) => outcome,
        Err(Error::NotFound(_)) if body.job_id.is_none() => {
            let queued = state.watchdog.enqueue(serde_json::json!({})).await?;
            state.watchdog.run_job(Some(queued.job_id)).await?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(outcome))
}
