//! Stored tokens: ciphertext at rest, owner resolution, refresh gating.

use chrono::{Duration, Utc};

use crate::support::Harness;
use nemawashi::config::CredentialConfig;
use nemawashi::credentials::CredentialStore;
use nemawashi::error::Error;

fn store() -> CredentialStore {
    CredentialStore::new(CredentialConfig::default(), Some("owner@example.com".to_owned()))
}

fn later() -> chrono::DateTime<Utc> {
    Utc::now()
        .checked_add_signed(Duration::hours(1))
        .expect("in range")
}

#[tokio::test]
async fn tokens_are_ciphertext_at_rest() {
    let h = Harness::new().await;
    let store = store();
    let mut conn = h.pool.acquire().await.expect("conn");
    store
        .store_token(
            &mut conn,
            "U1",
            "u1@example.com",
            "plain-access",
            Some("plain-refresh"),
            Some("Bearer"),
            None,
            Some(later()),
        )
        .await
        .expect("store");
    drop(conn);

    let (access, refresh): (String, Option<String>) =
        sqlx::query_as("SELECT access_token, refresh_token FROM calendar_tokens WHERE user_id = 'U1'")
            .fetch_one(&h.pool)
            .await
            .expect("row");
    assert_ne!(access, "plain-access");
    assert_ne!(refresh.as_deref(), Some("plain-refresh"));
    assert!(!access.contains("plain"));
}

#[tokio::test]
async fn resolves_by_user_then_email_then_default_owner() {
    let h = Harness::new().await;
    let store = store();
    let mut conn = h.pool.acquire().await.expect("conn");
    store
        .store_token(
            &mut conn,
            "U-owner",
            "owner@example.com",
            "owner-access",
            None,
            None,
            None,
            Some(later()),
        )
        .await
        .expect("store");

    // Unknown user id falls through to the linked-email lookup.
    let by_email = store
        .resolve_access_token(&mut conn, Some("U-unknown"), Some("owner@example.com"))
        .await
        .expect("by email");
    assert_eq!(by_email, "owner-access");

    // No owner hints at all: the configured default owner is used.
    let by_default = store
        .resolve_access_token(&mut conn, None, None)
        .await
        .expect("by default owner");
    assert_eq!(by_default, "owner-access");
}

#[tokio::test]
async fn missing_credential_is_a_credential_failure() {
    let h = Harness::new().await;
    let store = store();
    let mut conn = h.pool.acquire().await.expect("conn");
    let err = store
        .resolve_access_token(&mut conn, Some("U-none"), None)
        .await
        .expect_err("no credential stored");
    assert!(matches!(err, Error::Credential(_)));
}

#[tokio::test]
async fn expired_token_without_refresh_fails() {
    let h = Harness::new().await;
    let store = store();
    let mut conn = h.pool.acquire().await.expect("conn");
    let past = Utc::now()
        .checked_sub_signed(Duration::hours(1))
        .expect("in range");
    store
        .store_token(
            &mut conn,
            "U1",
            "u1@example.com",
            "stale-access",
            None,
            None,
            None,
            Some(past),
        )
        .await
        .expect("store");

    let err = store
        .resolve_access_token(&mut conn, Some("U1"), None)
        .await
        .expect_err("expired without refresh token");
    assert!(err.to_string().contains("no refresh token"));
}

#[tokio::test]
async fn expired_token_with_refresh_needs_oauth_client() {
    // With a refresh token present but no OAuth client configured, the
    // refresh path reports the configuration gap instead of dispatching.
    let h = Harness::new().await;
    let store = store();
    let mut conn = h.pool.acquire().await.expect("conn");
    let past = Utc::now()
        .checked_sub_signed(Duration::hours(1))
        .expect("in range");
    store
        .store_token(
            &mut conn,
            "U1",
            "u1@example.com",
            "stale-access",
            Some("refresh-1"),
            None,
            None,
            Some(past),
        )
        .await
        .expect("store");

    let err = store
        .resolve_access_token(&mut conn, Some("U1"), None)
        .await
        .expect_err("no oauth client configured");
    assert!(err.to_string().contains("OAuth client"));
}

#[tokio::test]
async fn upsert_without_refresh_preserves_prior_one() {
    let h = Harness::new().await;
    let store = store();
    let mut conn = h.pool.acquire().await.expect("conn");
    store
        .store_token(
            &mut conn,
            "U1",
            "u1@example.com",
            "access-1",
            Some("refresh-1"),
            None,
            None,
            Some(later()),
        )
        .await
        .expect("first store");
    let (first_refresh,): (Option<String>,) =
        sqlx::query_as("SELECT refresh_token FROM calendar_tokens WHERE user_id = 'U1'")
            .fetch_one(&mut *conn)
            .await
            .expect("row");

    // A rotation that carries no refresh token keeps the stored ciphertext.
    store
        .store_token(
            &mut conn,
            "U1",
            "u1@example.com",
            "access-2",
            None,
            None,
            None,
            Some(later()),
        )
        .await
        .expect("second store");
    let (second_refresh,): (Option<String>,) =
        sqlx::query_as("SELECT refresh_token FROM calendar_tokens WHERE user_id = 'U1'")
            .fetch_one(&mut *conn)
            .await
            .expect("row");
    assert_eq!(first_refresh, second_refresh);

    let access = store
        .resolve_access_token(&mut conn, Some("U1"), None)
        .await
        .expect("resolve rotated access");
    assert_eq!(access, "access-2");
}
