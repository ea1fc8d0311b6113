use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use tally_core::event::ValidationError;

/// Application-level errors that map directly to HTTP responses.
///
/// Validation is the only error class the tracking script ever sees.
/// Admission and delivery failures are absorbed by the track handler; an
/// embedded script must never surface errors on a host page.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("batch too large: {0} events")]
    BatchTooLarge(usize),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::BatchTooLarge(n) => AppError::BatchTooLarge(n),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            AppError::BatchTooLarge(n) => (
                StatusCode::BAD_REQUEST,
                "batch_too_large",
                format!(
                    "Batch has {n} events (max {})",
                    tally_core::event::MAX_BATCH_SIZE
                ),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}
