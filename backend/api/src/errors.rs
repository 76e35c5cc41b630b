//! Application-wide error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing user input; the message is field-level and safe
    /// to show to the client.
    #[error("{0}")]
    Validation(String),

    /// Missing, unknown, or expired admin credential.
    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    /// Operation attempted against a submission outside the required status.
    #[error("operation not allowed while the submission is {actual}")]
    InvalidState { actual: &'static str },

    /// The confirmed-member registry is full.
    #[error("all places are taken")]
    CapacityExceeded,

    /// Public submissions are currently closed.
    #[error("enrollment is currently closed")]
    SessionClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::InvalidState { .. } | ApiError::CapacityExceeded | ApiError::SessionClosed => {
                (StatusCode::CONFLICT, self.to_string())
            }
            // Internal causes go to the log; clients get a generic message.
            ApiError::Config(e) => {
                error!("configuration error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Database(e) => {
                error!("database error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Migrate(e) => {
                error!("migration error: {e}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
            ApiError::Internal(e) => {
                error!("internal error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
