//! Operator route for starting a demo run.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use super::error::ApiResult;
use super::AppState;
use crate::demo::DemoStartResult;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct StartBody {
    requested_by: Option<String>,
    requested_by_name: Option<String>,
}

/// `POST /v1/demo/start`
pub(super) async fn start(
    State(state): State<AppState>,
    body: Option<Json<StartBody>>,
) -> ApiResult<Json<DemoStartResult>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let requested_by = body.requested_by.as_deref().unwrap_or("operator");
    let result = state
        .demo
        .start(requested_by, body.requested_by_name.as_deref())
        .await?;
    Ok(Json(result))
}
