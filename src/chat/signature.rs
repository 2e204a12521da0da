//! Inbound webhook signature verification.
//!
//! The chat service signs each request with HMAC-SHA256 over
//! `v0:<timestamp>:<raw body>` and sends the digest as `v0=<hex>` alongside
//! the timestamp header. Comparison is constant-time and requests older than
//! the configured TTL are rejected regardless of signature validity.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute the expected signature header value (`v0=<hex>`) for a request.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify an inbound webhook request.
///
/// When no secret is configured the request is accepted only if
/// `allow_unsigned` is set. `now_epoch` is injected so tests can pin time.
///
/// # Errors
///
/// Returns [`Error::Signature`] describing which check failed.
pub fn verify(
    secret: Option<&str>,
    allow_unsigned: bool,
    ttl_seconds: i64,
    now_epoch: i64,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
) -> Result<()> {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        if allow_unsigned {
            return Ok(());
        }
        return Err(Error::Signature(
            "no signing secret configured and unsigned requests are not allowed".to_owned(),
        ));
    };

    let timestamp =
        timestamp.ok_or_else(|| Error::Signature("missing timestamp header".to_owned()))?;
    let signature =
        signature.ok_or_else(|| Error::Signature("missing signature header".to_owned()))?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| Error::Signature("timestamp is not an integer".to_owned()))?;
    if now_epoch.saturating_sub(ts).abs() > ttl_seconds {
        return Err(Error::Signature("request timestamp outside TTL".to_owned()));
    }

    let expected = compute_signature(secret, timestamp, body);
    if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(Error::Signature("signature mismatch".to_owned()))
    }
}
