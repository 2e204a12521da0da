//! Chat webhook endpoints: signature verification, payload decoding, and
//! background dispatch into the coordinator and demo driver.
//!
//! Handlers acknowledge within the webhook response window; the actual state
//! transitions run on spawned tasks that survive request completion.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::chat::payload::{
    contains_action_keyword, parse_action_value, parse_event_body, parse_interaction_body,
    parse_plan_selection, InteractionPayload, MessageEvent, ACTION_APPROVE, ACTION_REJECT,
    ACTION_REQUEST_CHANGES, DISAMBIGUATION_REPLY,
};
use crate::chat::signature;
use crate::error::Error;

fn verify(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), Error> {
    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok());
    let sig = headers.get("x-slack-signature").and_then(|v| v.to_str().ok());
    signature::verify(
        state.chat_config.signing_secret.as_deref(),
        state.chat_config.allow_unsigned,
        state.chat_config.request_ttl_seconds,
        Utc::now().timestamp(),
        timestamp,
        sig,
        body,
    )
}

/// `POST /slack/interactions` — button clicks and modal submissions.
pub(super) async fn interactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    verify(&state, &headers, &body).map_err(ApiError)?;

    let Some(payload) = parse_interaction_body(&body) else {
        return Ok(Json(json!({ "ok": true })));
    };
    let Some(action) = payload.action().cloned() else {
        return Ok(Json(json!({ "ok": true })));
    };
    let action_id = action.action_id.clone().unwrap_or_default();
    let value = action.value.clone().unwrap_or_default();
    let actor = payload.actor().map(str::to_owned);

    if let Some(alert_id) = parse_action_value(&value).get("alert_id").cloned() {
        return Ok(Json(dispatch_demo_interaction(
            &state, &payload, &action_id, &alert_id, actor,
        )));
    }

    let envelope = parse_action_value(&value);
    let Some(approval_request_id) = envelope.get("approval_request_id").cloned() else {
        return Ok(Json(json!({ "ok": true })));
    };
    let idempotency_key = payload.idempotency_key(&approval_request_id, &action_id);

    let ack = match action_id.as_str() {
        ACTION_APPROVE => {
            spawn_decision(&state, approval_request_id, actor, idempotency_key, Decision::Approve);
            json!({ "text": "approved" })
        }
        ACTION_REJECT => {
            spawn_decision(&state, approval_request_id, actor, idempotency_key, Decision::Reject);
            json!({ "text": "rejected" })
        }
        ACTION_REQUEST_CHANGES => {
            spawn_decision(
                &state,
                approval_request_id,
                actor,
                idempotency_key,
                Decision::RequestChanges,
            );
            json!({ "text": "request changes" })
        }
        other => json!({ "ok": true, "action_id": other }),
    };
    Ok(Json(ack))
}

enum Decision {
    Approve,
    Reject,
    RequestChanges,
}

fn spawn_decision(
    state: &AppState,
    approval_request_id: String,
    actor: Option<String>,
    idempotency_key: String,
    decision: Decision,
) {
    let coordinator = state.coordinator.clone();
    tokio::spawn(async move {
        let actor = actor.as_deref();
        let key = Some(idempotency_key.as_str());
        let outcome = match decision {
            Decision::Approve => coordinator
                .approve(&approval_request_id, actor, key)
                .await
                .map(|_| ()),
            Decision::Reject => coordinator.reject(&approval_request_id, actor, key).await,
            Decision::RequestChanges => coordinator
                .apply_steer(&approval_request_id, actor, "request_changes", None, key)
                .await
                .map(|_| ()),
        };
        if let Err(e) = outcome {
            warn!(%approval_request_id, error = %e, "chat interaction dispatch failed");
        }
    });
}

fn dispatch_demo_interaction(
    state: &AppState,
    payload: &InteractionPayload,
    action_id: &str,
    alert_id: &str,
    actor: Option<String>,
) -> Value {
    let demo = state.demo.clone();
    let alert = alert_id.to_owned();
    let key = payload.idempotency_key(alert_id, action_id);
    let plan = match action_id {
        "demo_plan_a" => Some("A"),
        "demo_plan_b" => Some("B"),
        "demo_plan_c" => Some("C"),
        _ => None,
    };
    let op = action_id.to_owned();
    tokio::spawn(async move {
        let actor = actor.as_deref();
        let key = Some(key.as_str());
        let outcome = match (op.as_str(), plan) {
            (_, Some(plan)) => demo.select_plan(&alert, actor, plan, key).await,
            ("demo_approve", _) => demo.approve(&alert, actor, key).await,
            ("demo_reject", _) => demo.reject(&alert, actor, key).await,
            ("demo_cancel", _) => demo.cancel(&alert, actor, key).await,
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            warn!(alert_id = %alert, error = %e, "demo interaction dispatch failed");
        }
    });
    json!({ "ok": true })
}

/// `POST /slack/events` — message events and the URL-verification handshake.
pub(super) async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    verify(&state, &headers, &body).map_err(ApiError)?;

    let Some(callback) = parse_event_body(&body) else {
        return Ok(Json(json!({ "ok": true })));
    };
    if callback.kind.as_deref() == Some("url_verification") {
        return Ok(Json(json!({ "challenge": callback.challenge })));
    }

    let Some(event) = callback.event else {
        return Ok(Json(json!({ "ok": true })));
    };
    if event.kind.as_deref() != Some("message")
        || event.subtype.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    {
        return Ok(Json(json!({ "ok": true })));
    }
    let text = event.text.clone().unwrap_or_default();
    if text.trim().is_empty() || event.thread().is_none() {
        return Ok(Json(json!({ "ok": true })));
    }

    let event_id = callback.event_id.clone();
    let state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_message_event(&state, &event, event_id).await {
            warn!(error = %e, "chat event dispatch failed");
        }
    });
    Ok(Json(json!({ "ok": true })))
}

/// Steer the thread a message was posted in, or ask for disambiguation.
async fn handle_message_event(
    state: &AppState,
    event: &MessageEvent,
    event_id: Option<String>,
) -> crate::error::Result<()> {
    let Some(thread_ts) = event.thread() else {
        return Ok(());
    };
    let text = event.text.clone().unwrap_or_default();
    let text = text.trim();

    let Some(approval_request_id) = state
        .coordinator
        .find_approval_by_chat_thread(thread_ts)
        .await?
    else {
        return Ok(());
    };

    let selected_plan = parse_plan_selection(text);
    if selected_plan.is_none() && !contains_action_keyword(text) {
        if let Some(channel) = event.channel.as_deref() {
            state
                .chat_gateway
                .post_thread_message(channel, thread_ts, DISAMBIGUATION_REPLY)
                .await;
        }
        return Ok(());
    }

    let idempotency_key = event_id.unwrap_or_else(|| format!("slack-event:{thread_ts}"));
    info!(thread_ts, %approval_request_id, "steering from thread message");
    state
        .coordinator
        .apply_steer(
            &approval_request_id,
            event.user.as_deref(),
            text,
            selected_plan.as_deref(),
            Some(&idempotency_key),
        )
        .await
        .map(|_| ())
}
