use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

/// The only error shape that reaches a client.
///
/// Credential failures are deliberately collapsed into `Unauthenticated` so a
/// caller cannot tell a revoked token from an expired or malformed one.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid or expired token, please log in again")]
    Unauthenticated,

    #[error("security event detected, please log in again")]
    ReplayDetected,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("internal server error")]
    Internal { correlation_id: Uuid },

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    /// Log `err` under a fresh correlation id and return an opaque `Internal`.
    pub fn internal(err: impl Display) -> Self {
        let correlation_id = Uuid::new_v4();
        error!(correlation_id = %correlation_id, error = %err, "Internal error");
        ApiError::Internal { correlation_id }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated | ApiError::ReplayDetected => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::ReplayDetected => "replay_detected",
            ApiError::Forbidden => "forbidden",
            ApiError::Internal { .. } => "internal",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::Internal { correlation_id } => json!({
                "error": self.to_string(),
                "code": self.code(),
                "correlation_id": correlation_id,
            }),
            _ => json!({
                "error": self.to_string(),
                "code": self.code(),
            }),
        };
        (self.status(), Json(body)).into_response()
    }
}
