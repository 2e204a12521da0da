//! Credential store: encrypted third-party tokens with automatic refresh.
//!
//! Tokens are sealed by [`TokenCipher`] before they reach the database and
//! opened only inside this module. Access tokens within 60 seconds of expiry
//! are refreshed before use; a refresh response that omits a new refresh
//! token keeps the stored one.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::config::CredentialConfig;
use crate::crypto::TokenCipher;
use crate::db::tokens::{self, TokenRow};
use crate::error::{Error, Result};

/// Buffer before actual expiry at which a token counts as expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Returns `true` when a token expiring at `expires_at` should be refreshed
/// at time `now`. Tokens without a known expiry are never refreshed eagerly.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let horizon = now
        .checked_add_signed(Duration::seconds(EXPIRY_SKEW_SECONDS))
        .unwrap_or(now);
    match expires_at {
        Some(exp) => exp <= horizon,
        None => false,
    }
}

/// Response from the OAuth token endpoint on a refresh grant.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Encrypted credential store for calendar owners.
pub struct CredentialStore {
    cipher: TokenCipher,
    config: CredentialConfig,
    default_owner_email: Option<String>,
    http: reqwest::Client,
}

impl CredentialStore {
    /// Build a store from configuration.
    pub fn new(config: CredentialConfig, default_owner_email: Option<String>) -> Self {
        Self {
            cipher: TokenCipher::from_secret(&config.token_secret),
            config,
            default_owner_email,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Seal and persist a credential for a user.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] on encryption failure and
    /// [`Error::Database`] on write failure.
    #[allow(clippy::too_many_arguments)]
    pub async fn store_token(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        email: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_type: Option<&str>,
        scope: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let row = TokenRow {
            user_id: user_id.to_owned(),
            google_email: email.to_owned(),
            access_token: self.cipher.encrypt(access_token)?,
            refresh_token: refresh_token.map(|t| self.cipher.encrypt(t)).transpose()?,
            token_type: token_type.map(str::to_owned),
            scope: scope.map(str::to_owned),
            expires_at,
        };
        tokens::upsert_token(conn, &row).await?;
        debug!(user_id, email, "credential stored");
        Ok(())
    }

    /// Resolve a usable access token for the given owner.
    ///
    /// Lookup order: user id, then linked email, then the configured default
    /// owner. The token is refreshed first when it expires within the skew
    /// window and a refresh token is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Credential`] when no credential exists for any
    /// candidate owner or the refresh grant fails.
    pub async fn resolve_access_token(
        &self,
        conn: &mut SqliteConnection,
        owner_user_id: Option<&str>,
        owner_email: Option<&str>,
    ) -> Result<String> {
        let row = self.lookup(conn, owner_user_id, owner_email).await?;
        if needs_refresh(row.expires_at, Utc::now()) {
            if row.refresh_token.is_some() {
                return self.refresh(conn, &row).await;
            }
            return Err(Error::Credential(format!(
                "token for {} is expired and has no refresh token",
                row.google_email
            )));
        }
        self.cipher.decrypt(&row.access_token)
    }

    async fn lookup(
        &self,
        conn: &mut SqliteConnection,
        owner_user_id: Option<&str>,
        owner_email: Option<&str>,
    ) -> Result<TokenRow> {
        if let Some(user_id) = owner_user_id.filter(|v| !v.is_empty()) {
            if let Some(row) = tokens::fetch_by_user(conn, user_id).await? {
                return Ok(row);
            }
        }
        if let Some(email) = owner_email.filter(|v| !v.is_empty()) {
            if let Some(row) = tokens::fetch_by_email(conn, email).await? {
                return Ok(row);
            }
        }
        if let Some(email) = self.default_owner_email.as_deref() {
            if let Some(row) = tokens::fetch_by_email(conn, email).await? {
                return Ok(row);
            }
        }
        Err(Error::Credential(
            "no stored credential for calendar owner".to_owned(),
        ))
    }

    /// Run a refresh grant and persist the rotated token.
    async fn refresh(&self, conn: &mut SqliteConnection, row: &TokenRow) -> Result<String> {
        let refresh_cipher = row
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::Credential("no refresh token available".to_owned()))?;
        let refresh_plain = self.cipher.decrypt(refresh_cipher)?;

        let client_id = self
            .config
            .google_client_id
            .as_deref()
            .ok_or_else(|| Error::Credential("OAuth client is not configured".to_owned()))?;
        let client_secret = self
            .config
            .google_client_secret
            .as_deref()
            .ok_or_else(|| Error::Credential("OAuth client is not configured".to_owned()))?;

        let response = self
            .http
            .post(&self.config.google_token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_plain.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| Error::Credential(format!("refresh request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Credential(format!("refresh response unreadable: {e}")))?;
        if !status.is_success() {
            // Truncate to keep provider error bodies out of logs wholesale.
            let safe_len = body.len().min(200);
            return Err(Error::Credential(format!(
                "token refresh failed: HTTP {status}: {}",
                &body[..safe_len]
            )));
        }

        let parsed: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Credential(format!("refresh response parse error: {e}")))?;

        let expires_at = parsed
            .expires_in
            .and_then(|secs| Utc::now().checked_add_signed(Duration::seconds(secs)));

        let updated = TokenRow {
            user_id: row.user_id.clone(),
            google_email: row.google_email.clone(),
            access_token: self.cipher.encrypt(&parsed.access_token)?,
            // None preserves the stored refresh token in the upsert.
            refresh_token: parsed
                .refresh_token
                .as_deref()
                .map(|t| self.cipher.encrypt(t))
                .transpose()?,
            token_type: parsed.token_type.or_else(|| row.token_type.clone()),
            scope: parsed.scope.or_else(|| row.scope.clone()),
            expires_at,
        };
        tokens::upsert_token(conn, &updated).await?;
        info!(email = %row.google_email, "access token refreshed");
        Ok(parsed.access_token)
    }
}
