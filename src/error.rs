//! Error taxonomy shared by the coordinator, executor, gateways, and intake.
//!
//! Every fallible operation in the crate returns [`Error`]. The HTTP layer
//! maps the variants onto status codes (404/409/401/400/500); the chat layer
//! turns them into thread replies where a handle exists.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification for coordinator operations and their collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing action, approval request, or thread.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state transition, e.g. steer after execution started.
    #[error("conflict: {0}")]
    Conflict(String),

    /// An external provider or chat call failed.
    #[error("{provider} integration failed: {message}")]
    Integration {
        /// Which backend failed (`mock`, `google`, `slack`, `hr`…).
        provider: String,
        /// HTTP status when the failure came from a response.
        status: Option<u16>,
        /// Provider-supplied or transport-level message.
        message: String,
    },

    /// Missing or unrefreshable credential.
    #[error("credential failure: {0}")]
    Credential(String),

    /// Webhook signature rejected.
    #[error("signature rejected: {0}")]
    Signature(String),

    /// Internal bug guard; no state is mutated when this is raised.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Malformed request or payload.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Durable store failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Checkpoint or payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build an [`Error::Integration`] without an HTTP status.
    pub fn integration(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Integration {
            provider: provider.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Build an [`Error::Integration`] carrying the response status.
    pub fn integration_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::Integration {
            provider: provider.into(),
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        Self::Integration {
            provider: "http".to_owned(),
            status,
            message: e.to_string(),
        }
    }
}
