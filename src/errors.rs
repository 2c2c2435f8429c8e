use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::responses::JsonResponse;

/// Crate-wide error taxonomy. Every user-visible error carries a
/// human-readable message next to the machine kind.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input; the client should not retry unchanged.
    #[error("{0}")]
    Validation(String),
    /// Missing or invalid actor.
    #[error("{0}")]
    Auth(String),
    /// Valid actor, insufficient role or ownership.
    #[error("{0}")]
    Forbidden(String),
    /// State moved underneath the client (slot taken, already cancelled,
    /// duplicate redemption); it must re-query before retrying.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    /// Upstream provider call failed or returned an unexpected shape.
    #[error("{0}")]
    Gateway(String),
    #[error("internal error")]
    Internal(#[from] sqlx::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::Auth(_) => "AUTH",
            ApiError::Forbidden(_) => "AUTH",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Gateway(_) => "GATEWAY_ERROR",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Gateway(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Internal(err) => {
                // Storage details stay out of the response body.
                error!(?err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Something went wrong. Please try again.".to_string(),
                )
            }
        };
        JsonResponse::error_with_code(status, &message, self.code()).into_response()
    }
}
