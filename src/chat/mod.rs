//! Chat gateway: outbound approval prompts and thread messages, inbound
//! webhook decoding.
//!
//! Outbound posts go through a [`ChatTransport`] so tests can capture them.
//! Delivery failures are logged and absorbed — the state machine never fails
//! an operation because a chat post did not land; it simply keeps no handle.

pub mod payload;
pub mod signature;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::ChatConfig;
use crate::error::{Error, Result};

/// Where an approval conversation lives: channel + message + thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHandle {
    /// Channel id the prompt was posted to.
    pub channel: String,
    /// Timestamp of the prompt message.
    pub message_ts: String,
    /// Thread root; equals `message_ts` for fresh prompts.
    pub thread_ts: Option<String>,
}

impl ChatHandle {
    /// The timestamp replies should thread under.
    pub fn reply_thread(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.message_ts)
    }
}

/// Result of a successful API post.
#[derive(Debug, Clone)]
pub struct PostedMessage {
    /// Channel the message landed in.
    pub channel: String,
    /// Message timestamp assigned by the chat service.
    pub ts: String,
}

/// Transport seam for outbound chat calls.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post a message payload. Returns the posted handle when the transport
    /// can know it (API posts), `None` otherwise (webhook posts, disabled).
    async fn post_message(&self, payload: &Value) -> Result<Option<PostedMessage>>;
}

/// Transport used when no chat credentials are configured: every post is a
/// silent no-op.
pub struct DisabledTransport;

#[async_trait]
impl ChatTransport for DisabledTransport {
    async fn post_message(&self, _payload: &Value) -> Result<Option<PostedMessage>> {
        Ok(None)
    }
}

/// HTTP transport against the chat service API, with an incoming-webhook
/// fallback when no bot token is configured.
pub struct ApiTransport {
    client: reqwest::Client,
    bot_token: Option<String>,
    webhook_url: Option<String>,
    api_url: String,
}

/// Chat API endpoint for posting messages.
const CHAT_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

impl ApiTransport {
    /// Build a transport from chat configuration.
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            bot_token: config.bot_token.clone(),
            webhook_url: config.webhook_url.clone(),
            api_url: CHAT_POST_MESSAGE_URL.to_owned(),
        }
    }

    async fn post_api(&self, token: &str, payload: &Value) -> Result<Option<PostedMessage>> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() || body.get("ok").and_then(Value::as_bool) != Some(true) {
            let detail = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("post rejected");
            return Err(Error::integration_status("slack", status.as_u16(), detail));
        }
        let channel = body
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let ts = body
            .get("ts")
            .and_then(Value::as_str)
            .or_else(|| {
                body.get("message")
                    .and_then(|m| m.get("ts"))
                    .and_then(Value::as_str)
            })
            .map(str::to_owned);
        Ok(match (channel, ts) {
            (Some(channel), Some(ts)) => Some(PostedMessage { channel, ts }),
            _ => None,
        })
    }

    async fn post_webhook(&self, url: &str, payload: &Value) -> Result<Option<PostedMessage>> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::integration_status(
                "slack-webhook",
                status.as_u16(),
                "webhook post rejected",
            ));
        }
        // Incoming webhooks acknowledge with a bare "ok" and no timestamp.
        Ok(None)
    }
}

#[async_trait]
impl ChatTransport for ApiTransport {
    async fn post_message(&self, payload: &Value) -> Result<Option<PostedMessage>> {
        if let Some(token) = self.bot_token.as_deref() {
            return self.post_api(token, payload).await;
        }
        if let Some(url) = self.webhook_url.as_deref() {
            return self.post_webhook(url, payload).await;
        }
        Ok(None)
    }
}

/// Outbound half of the chat gateway.
pub struct ChatGateway {
    transport: Arc<dyn ChatTransport>,
    default_channel: Option<String>,
}

impl ChatGateway {
    /// Build a gateway over the given transport.
    pub fn new(transport: Arc<dyn ChatTransport>, default_channel: Option<String>) -> Self {
        Self {
            transport,
            default_channel,
        }
    }

    /// Build the production gateway from configuration.
    pub fn from_config(config: &ChatConfig) -> Self {
        let transport: Arc<dyn ChatTransport> =
            if config.bot_token.is_some() || config.webhook_url.is_some() {
                Arc::new(ApiTransport::new(config))
            } else {
                Arc::new(DisabledTransport)
            };
        Self::new(transport, config.default_channel.clone())
    }

    /// Post an approval prompt, reusing a prior channel/thread when present.
    ///
    /// Returns the handle of the posted prompt, or `None` when the transport
    /// could not deliver or could not report a timestamp. Failures are
    /// logged, never propagated.
    pub async fn send_approval_prompt(
        &self,
        action_id: i64,
        approval_request_id: &str,
        thread_id: &str,
        summary: Option<&str>,
        draft: Option<&str>,
        prior: Option<&ChatHandle>,
    ) -> Option<ChatHandle> {
        let title = summary.unwrap_or("Approval required");
        let value = payload::build_action_value(thread_id, approval_request_id, action_id);
        let blocks = approval_blocks(title, draft, &value, thread_id, approval_request_id);

        let channel = prior
            .map(|h| h.channel.clone())
            .or_else(|| self.default_channel.clone());
        let thread_ts = prior.map(|h| h.reply_thread().to_owned());

        let mut payload = json!({ "text": title, "blocks": blocks });
        if let Some(channel) = &channel {
            payload["channel"] = json!(channel);
        }
        if let Some(ts) = &thread_ts {
            payload["thread_ts"] = json!(ts);
        }

        match self.transport.post_message(&payload).await {
            Ok(Some(posted)) => Some(ChatHandle {
                channel: posted.channel,
                thread_ts: Some(thread_ts.unwrap_or_else(|| posted.ts.clone())),
                message_ts: posted.ts,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(thread_id, error = %e, "approval prompt post failed");
                None
            }
        }
    }

    /// Post a plain message into an existing thread. Failures are logged.
    pub async fn post_thread_message(&self, channel: &str, thread_ts: &str, text: &str) {
        if channel.is_empty() || thread_ts.is_empty() {
            return;
        }
        let payload = json!({ "channel": channel, "thread_ts": thread_ts, "text": text });
        if let Err(e) = self.transport.post_message(&payload).await {
            warn!(channel, thread_ts, error = %e, "thread message post failed");
        }
    }

    /// Post a demo alert with plan-selection buttons. Returns the handle.
    pub async fn post_demo_alert(&self, alert_id: &str) -> Option<ChatHandle> {
        let text = "⚠️ 介入アラート: プロジェクトに要対応のリスクを検知しました";
        let blocks = json!([
            { "type": "header", "text": { "type": "plain_text", "text": "介入アラート" } },
            { "type": "section", "text": { "type": "mrkdwn", "text": text } },
            { "type": "actions", "elements": [
                demo_button("demo_plan_a", "Plan A", alert_id, None),
                demo_button("demo_plan_b", "Plan B", alert_id, None),
                demo_button("demo_plan_c", "Plan C", alert_id, None),
            ]},
            { "type": "context", "elements": [
                { "type": "mrkdwn", "text": format!("alert_id: `{alert_id}`") },
            ]},
        ]);
        let mut payload = json!({ "text": text, "blocks": blocks });
        if let Some(channel) = &self.default_channel {
            payload["channel"] = json!(channel);
        }
        match self.transport.post_message(&payload).await {
            Ok(Some(posted)) => Some(ChatHandle {
                channel: posted.channel,
                thread_ts: Some(posted.ts.clone()),
                message_ts: posted.ts,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(alert_id, error = %e, "demo alert post failed");
                None
            }
        }
    }

    /// Post the demo execution-draft prompt with approve/reject buttons.
    pub async fn post_demo_approval_prompt(
        &self,
        channel: &str,
        thread_ts: &str,
        summary: &str,
        alert_id: &str,
    ) {
        let blocks = json!([
            { "type": "section", "text": { "type": "mrkdwn", "text": summary } },
            { "type": "actions", "elements": [
                demo_button("demo_approve", "Approve", alert_id, Some("primary")),
                demo_button("demo_reject", "Reject", alert_id, Some("danger")),
            ]},
        ]);
        let payload = json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": summary,
            "blocks": blocks,
        });
        if let Err(e) = self.transport.post_message(&payload).await {
            warn!(alert_id, error = %e, "demo approval prompt post failed");
        }
    }

    /// Post the demo retry prompt after a calendar failure.
    pub async fn post_demo_retry_prompt(
        &self,
        channel: &str,
        thread_ts: &str,
        alert_id: &str,
        reason: &str,
    ) {
        let text = format!("カレンダー登録に失敗しました: {reason}");
        let blocks = json!([
            { "type": "section", "text": { "type": "mrkdwn", "text": text } },
            { "type": "actions", "elements": [
                demo_button("demo_approve", "Retry", alert_id, Some("primary")),
                demo_button("demo_cancel", "Cancel", alert_id, Some("danger")),
            ]},
        ]);
        let payload = json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": text,
            "blocks": blocks,
        });
        if let Err(e) = self.transport.post_message(&payload).await {
            warn!(alert_id, error = %e, "demo retry prompt post failed");
        }
    }
}

/// Build the block list for an approval prompt: header, summary, optional
/// draft code block, three action buttons, and a context row naming the
/// thread and approval request.
fn approval_blocks(
    title: &str,
    draft: Option<&str>,
    value: &str,
    thread_id: &str,
    approval_request_id: &str,
) -> Value {
    let mut blocks = vec![
        json!({ "type": "header", "text": { "type": "plain_text", "text": "HITL Approval" } }),
        json!({ "type": "section", "text": { "type": "mrkdwn", "text": format!("*{title}*") } }),
    ];
    if let Some(draft) = draft.filter(|d| !d.is_empty()) {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("```{draft}```") },
        }));
    }
    blocks.push(json!({
        "type": "actions",
        "elements": [
            {
                "type": "button",
                "action_id": payload::ACTION_APPROVE,
                "text": { "type": "plain_text", "text": "Approve" },
                "style": "primary",
                "value": value,
            },
            {
                "type": "button",
                "action_id": payload::ACTION_REJECT,
                "text": { "type": "plain_text", "text": "Reject" },
                "style": "danger",
                "value": value,
            },
            {
                "type": "button",
                "action_id": payload::ACTION_REQUEST_CHANGES,
                "text": { "type": "plain_text", "text": "Request changes" },
                "value": value,
            },
        ],
    }));
    blocks.push(json!({
        "type": "context",
        "elements": [
            { "type": "mrkdwn", "text": format!("thread_id: `{thread_id}`") },
            { "type": "mrkdwn", "text": format!("approval_id: `{approval_request_id}`") },
        ],
    }));
    Value::Array(blocks)
}

fn demo_button(action_id: &str, label: &str, alert_id: &str, style: Option<&str>) -> Value {
    let mut button = json!({
        "type": "button",
        "action_id": action_id,
        "text": { "type": "plain_text", "text": label },
        "value": format!("alert_id={alert_id}"),
    });
    if let Some(style) = style {
        button["style"] = json!(style);
    }
    button
}
