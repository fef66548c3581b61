//! Relay error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Relay server error types mapped to HTTP status codes.
#[derive(Debug)]
pub enum RelayError {
    Database(String),
    Auth(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    BadRequest(String),
    Internal(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Database error: {}", e),
            Self::Auth(e) => write!(f, "Auth error: {}", e),
            Self::NotFound(e) => write!(f, "Not found: {}", e),
            Self::Conflict(e) => write!(f, "Conflict: {}", e),
            Self::PayloadTooLarge(e) => write!(f, "Payload too large: {}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Database(_) | Self::Internal(_) => {
                error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Self::Auth(e) => (StatusCode::UNAUTHORIZED, e.clone()),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            Self::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            Self::PayloadTooLarge(e) => (StatusCode::PAYLOAD_TOO_LARGE, e.clone()),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task failed: {}", e))
    }
}
