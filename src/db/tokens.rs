//! `calendar_tokens`: per-user third-party OAuth tokens, stored encrypted.
//!
//! Token columns hold ciphertext sealed by [`crate::crypto::TokenCipher`];
//! this module never sees plaintext. A refresh that returns no new refresh
//! token keeps the prior ciphertext (`COALESCE` in the upsert).

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::Result;

/// A stored credential row. Token fields are ciphertext.
#[derive(Debug, Clone)]
pub struct TokenRow {
    /// Owning user id.
    pub user_id: String,
    /// Linked provider identity (email).
    pub google_email: String,
    /// Sealed access token.
    pub access_token: String,
    /// Sealed refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    /// Provider token type (`Bearer`).
    pub token_type: Option<String>,
    /// Granted scopes.
    pub scope: Option<String>,
    /// Access-token expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

type TokenTuple = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn row_from_tuple(row: TokenTuple) -> TokenRow {
    let (user_id, google_email, access_token, refresh_token, token_type, scope, expires_at) = row;
    TokenRow {
        user_id,
        google_email,
        access_token,
        refresh_token,
        token_type,
        scope,
        expires_at: expires_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// Insert or update a credential row.
///
/// Passing `refresh_token = None` preserves any previously stored refresh
/// token for the user.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on write failure.
pub async fn upsert_token(conn: &mut SqliteConnection, row: &TokenRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO calendar_tokens \
           (user_id, google_email, access_token, refresh_token, token_type, scope, expires_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT (user_id) DO UPDATE SET \
             google_email = excluded.google_email, \
             access_token = excluded.access_token, \
             refresh_token = COALESCE(excluded.refresh_token, calendar_tokens.refresh_token), \
             token_type = COALESCE(excluded.token_type, calendar_tokens.token_type), \
             scope = COALESCE(excluded.scope, calendar_tokens.scope), \
             expires_at = excluded.expires_at",
    )
    .bind(&row.user_id)
    .bind(&row.google_email)
    .bind(&row.access_token)
    .bind(&row.refresh_token)
    .bind(&row.token_type)
    .bind(&row.scope)
    .bind(row.expires_at.map(|dt| dt.to_rfc3339()))
    .execute(conn)
    .await?;
    Ok(())
}

/// Fetch a credential by owning user id.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn fetch_by_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Option<TokenRow>> {
    let row: Option<TokenTuple> = sqlx::query_as(
        "SELECT user_id, google_email, access_token, refresh_token, token_type, scope, expires_at \
         FROM calendar_tokens WHERE user_id = ?1",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(row_from_tuple))
}

/// Fetch a credential by linked email.
///
/// # Errors
///
/// Returns [`crate::error::Error::Database`] on query failure.
pub async fn fetch_by_email(conn: &mut SqliteConnection, email: &str) -> Result<Option<TokenRow>> {
    let row: Option<TokenTuple> = sqlx::query_as(
        "SELECT user_id, google_email, access_token, refresh_token, token_type, scope, expires_at \
         FROM calendar_tokens WHERE google_email = ?1 LIMIT 1",
    )
    .bind(email)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(row_from_tuple))
}
