//! HTTP intake: axum router, operator auth, and webhook mounting.
//!
//! Operator routes sit behind a static bearer token compared in constant
//! time; webhook routes authenticate with the chat signature instead. All
//! adapters translate straight into coordinator operations — no business
//! logic lives here.

mod approvals;
mod demo;
pub mod error;
mod watchdog;
mod webhooks;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use sqlx::SqlitePool;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::chat::ChatGateway;
use crate::config::ChatConfig;
use crate::coordinator::Coordinator;
use crate::demo::DemoDriver;
use crate::watchdog::Watchdog;

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    /// The approval state machine.
    pub coordinator: Arc<Coordinator>,
    /// The periodic analyzer.
    pub watchdog: Arc<Watchdog>,
    /// The demo intake channel.
    pub demo: Arc<DemoDriver>,
    /// Outbound chat gateway (disambiguation replies).
    pub chat_gateway: Arc<ChatGateway>,
    /// Webhook signature settings.
    pub chat_config: ChatConfig,
    /// Operator bearer token; `None` disables auth (development only).
    pub api_token: Option<String>,
    /// Database pool for thin intake queries.
    pub pool: SqlitePool,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let operator = Router::new()
        .route("/v1/actions", post(approvals::create_action))
        .route(
            "/v1/nemawashi/:action_id/request-approval",
            post(approvals::request_approval),
        )
        .route("/v1/nemawashi/:action_id/execute", post(approvals::execute))
        .route("/v1/approvals/:approval_id/approve", post(approvals::approve))
        .route("/v1/approvals/:approval_id/reject", post(approvals::reject))
        .route("/v1/approvals/:approval_id/steer", post(approvals::steer))
        .route("/v1/audit/:thread_id", get(approvals::audit))
        .route("/v1/history", get(approvals::history))
        .route("/v1/watchdog/enqueue", post(watchdog::enqueue))
        .route("/v1/watchdog/run", post(watchdog::run))
        .route("/v1/demo/start", post(demo::start))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ));

    let webhooks = Router::new()
        .route("/slack/interactions", post(webhooks::interactions))
        .route("/slack/events", post(webhooks::events));

    Router::new()
        .route("/health", get(health))
        .merge(operator)
        .merge(webhooks)
        .with_state(state)
}

/// Serve the router until the process is stopped.
///
/// # Errors
///
/// Returns an error when the listener cannot bind.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind_addr, "http intake listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Constant-time bearer-token check for the operator surface.
async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let authorized = provided
        .map(|token| token.as_bytes().ct_eq(expected.as_bytes()).into())
        .unwrap_or(false);
    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "invalid or missing bearer token" })),
        )
            .into_response()
    }
}
