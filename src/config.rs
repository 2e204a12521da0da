//! Configuration loading and management.
//!
//! Loads configuration from `./nemawashi.toml` (or `$NEMAWASHI_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP intake settings (`[server]`).
    pub server: ServerConfig,
    /// Filesystem and database paths (`[paths]`).
    pub paths: PathsConfig,
    /// Chat gateway settings (`[chat]`).
    pub chat: ChatConfig,
    /// Executor provider settings (`[executor]`).
    pub executor: ExecutorConfig,
    /// Credential store settings (`[credentials]`).
    pub credentials: CredentialConfig,
}

impl AppConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$NEMAWASHI_CONFIG_PATH` or `./nemawashi.toml`.
    /// A missing file yields defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: AppConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(AppConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    fn config_path() -> PathBuf {
        if let Ok(p) = std::env::var("NEMAWASHI_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("nemawashi.toml")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Server.
        if let Some(v) = env("NEMAWASHI_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = env("NEMAWASHI_API_TOKEN") {
            self.server.api_token = non_empty(v);
        }

        // Paths.
        if let Some(v) = env("NEMAWASHI_DATABASE_URL") {
            self.paths.database_url = v;
        }
        if let Some(v) = env("NEMAWASHI_LOGS_DIR") {
            self.paths.logs_dir = v;
        }

        // Chat.
        if let Some(v) = env("SLACK_SIGNING_SECRET") {
            self.chat.signing_secret = non_empty(v);
        }
        if let Some(v) = env("SLACK_BOT_TOKEN") {
            self.chat.bot_token = non_empty(v);
        }
        if let Some(v) = env("SLACK_DEFAULT_CHANNEL") {
            self.chat.default_channel = non_empty(v);
        }
        if let Some(v) = env("SLACK_WEBHOOK_URL") {
            self.chat.webhook_url = non_empty(v);
        }
        if let Some(v) = env("SLACK_REQUEST_TTL_SECONDS") {
            match v.parse() {
                Ok(n) => self.chat.request_ttl_seconds = n,
                Err(_) => tracing::warn!(
                    var = "SLACK_REQUEST_TTL_SECONDS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("SLACK_ALLOW_UNSIGNED") {
            self.chat.allow_unsigned = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = env("APPROVER_USER_IDS") {
            self.chat.approver_user_ids = split_csv(&v);
        }

        // Executor.
        if let Some(v) = env("EMAIL_PROVIDER") {
            self.executor.email_provider = v;
        }
        if let Some(v) = env("CALENDAR_PROVIDER") {
            self.executor.calendar_provider = v;
        }
        if let Some(v) = env("HR_PROVIDER") {
            self.executor.hr_provider = v;
        }
        if let Some(v) = env("HR_API_URL") {
            self.executor.hr_api_url = non_empty(v);
        }
        if let Some(v) = env("EMAIL_DEFAULT_TO") {
            self.executor.default_email_to = v;
        }
        if let Some(v) = env("EMAIL_DEFAULT_FROM") {
            self.executor.default_email_from = v;
        }
        if let Some(v) = env("CALENDAR_DEFAULT_ATTENDEE") {
            self.executor.default_attendee = non_empty(v);
        }
        if let Some(v) = env("CALENDAR_DEFAULT_TIMEZONE") {
            self.executor.default_timezone = v;
        }
        if let Some(v) = env("CALENDAR_OWNER_EMAIL") {
            self.executor.default_owner_email = non_empty(v);
        }
        if let Some(v) = env("CALENDAR_ID") {
            self.executor.calendar_id = v;
        }
        if let Some(v) = env("INVITEE_EMAILS") {
            self.executor.demo_invitee_emails = split_csv(&v);
        }

        // Credentials.
        if let Some(v) = env("TOKEN_SECRET") {
            self.credentials.token_secret = v;
        }
        if let Some(v) = env("GOOGLE_OAUTH_CLIENT_ID") {
            self.credentials.google_client_id = non_empty(v);
        }
        if let Some(v) = env("GOOGLE_OAUTH_CLIENT_SECRET") {
            self.credentials.google_client_secret = non_empty(v);
        }
        if let Some(v) = env("GOOGLE_OAUTH_TOKEN_URL") {
            self.credentials.google_token_url = v;
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("change_me") {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .replace(';', ",")
        .split(',')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Server config ───────────────────────────────────────────────

/// HTTP intake settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the axum listener.
    pub bind_addr: String,
    /// Static bearer token for the operator surface. `None` disables auth
    /// (development only).
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_owned(),
            api_token: None,
        }
    }
}

// ── Paths config ────────────────────────────────────────────────

/// Filesystem and database paths (`[paths]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// SQLite database URL.
    pub database_url: String,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://nemawashi.db".to_owned(),
            logs_dir: "logs".to_owned(),
        }
    }
}

// ── Chat config ─────────────────────────────────────────────────

/// Chat gateway settings (`[chat]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Shared secret for inbound webhook signatures. When unset, webhooks are
    /// only accepted if `allow_unsigned` is set.
    pub signing_secret: Option<String>,
    /// Bot token for the chat API. When unset, outbound posts are skipped.
    pub bot_token: Option<String>,
    /// Channel used when a thread has no prior handle.
    pub default_channel: Option<String>,
    /// Incoming-webhook fallback for outbound posts.
    pub webhook_url: Option<String>,
    /// Maximum age of a signed webhook request, in seconds.
    pub request_ttl_seconds: i64,
    /// Accept unsigned webhooks when no signing secret is configured.
    pub allow_unsigned: bool,
    /// Users allowed to approve demo runs. Empty allows everyone.
    pub approver_user_ids: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            bot_token: None,
            default_channel: None,
            webhook_url: None,
            request_ttl_seconds: 300,
            allow_unsigned: false,
            approver_user_ids: Vec::new(),
        }
    }
}

// ── Executor config ─────────────────────────────────────────────

/// Executor provider settings (`[executor]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Email backend. Only `mock` is supported.
    pub email_provider: String,
    /// Calendar backend: `mock` or `google`.
    pub calendar_provider: String,
    /// HR backend: `mock` or anything else with `hr_api_url` set.
    pub hr_provider: String,
    /// Endpoint for non-mock HR requests.
    pub hr_api_url: Option<String>,
    /// Default email recipient when the payload omits `to`.
    pub default_email_to: String,
    /// Default email sender when the payload omits `from`.
    pub default_email_from: String,
    /// Default calendar attendee. Falls back to `default_email_to`.
    pub default_attendee: Option<String>,
    /// Default IANA timezone name for calendar payloads and local date math.
    pub default_timezone: String,
    /// Calendar owner whose stored credential is used when the payload names
    /// no owner.
    pub default_owner_email: Option<String>,
    /// Target calendar id.
    pub calendar_id: String,
    /// Invitees for demo bookings.
    pub demo_invitee_emails: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            email_provider: "mock".to_owned(),
            calendar_provider: "mock".to_owned(),
            hr_provider: "mock".to_owned(),
            hr_api_url: None,
            default_email_to: "manager@example.com".to_owned(),
            default_email_from: "no-reply@nemawashi.local".to_owned(),
            default_attendee: None,
            default_timezone: "Asia/Tokyo".to_owned(),
            default_owner_email: None,
            calendar_id: "primary".to_owned(),
            demo_invitee_emails: vec!["demo-invitee@example.com".to_owned()],
        }
    }
}

impl ExecutorConfig {
    /// Resolve the default calendar attendee.
    pub fn attendee_fallback(&self) -> &str {
        self.default_attendee
            .as_deref()
            .unwrap_or(&self.default_email_to)
    }
}

// ── Credential config ───────────────────────────────────────────

/// Credential store settings (`[credentials]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Deployment secret the token cipher key is derived from.
    pub token_secret: String,
    /// OAuth client id for token refresh.
    pub google_client_id: Option<String>,
    /// OAuth client secret for token refresh.
    pub google_client_secret: Option<String>,
    /// OAuth token endpoint.
    pub google_token_url: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            token_secret: "dev-secret".to_owned(),
            google_client_id: None,
            google_client_secret: None,
            google_token_url: "https://oauth2.googleapis.com/token".to_owned(),
        }
    }
}
