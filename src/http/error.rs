//! HTTP error mapping for the operator and webhook surfaces.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use crate::error::Error;

/// Handler-facing result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrapper that renders the crate error taxonomy as HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Signature(_) => StatusCode::UNAUTHORIZED,
            Error::Invalid(_) => StatusCode::BAD_REQUEST,
            Error::Integration { .. } | Error::Credential(_) => StatusCode::BAD_GATEWAY,
            Error::Invariant(_) | Error::Database(_) | Error::Serialization(_) => {
                warn!(error = %self.0, "internal error on http surface");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}
