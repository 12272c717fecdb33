//! # Centralized Error Handling
//!
//! This module defines the application-wide error type [`AppError`] used
//! consistently across all backend modules. It follows the `thiserror`
//! pattern for ergonomic error handling.
//!
//! ## Design Philosophy
//!
//! - **Single Error Type**: All modules use `AppError` for consistency
//! - **Descriptive Messages**: Each variant includes a context string
//! - **HTTP Mapping**: Errors map naturally to HTTP status codes
//! - **Component Isolation**: each variant names the component that failed,
//!   so a failure is handled where it happened and never crosses into a
//!   sibling component
//!
//! ## Error Categories
//!
//! 1. **Feed path** — [`Feed`](AppError::Feed): the change notification
//!    stream failed; recovered by reconnect with backoff.
//! 2. **Delivery path** — [`Delivery`](AppError::Delivery): one viewer
//!    session's outbound write failed; recovered by unregistering that
//!    session only.
//! 3. **Index path** — [`IndexWrite`](AppError::IndexWrite) for a single
//!    document (skip and log) and
//!    [`IndexUnavailable`](AppError::IndexUnavailable) for connectivity
//!    (bounded retry with backoff).
//! 4. **Infrastructure** — [`Config`](AppError::Config),
//!    [`Store`](AppError::Store), [`Decoding`](AppError::Decoding),
//!    [`Internal`](AppError::Internal).

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

/// Convenience type alias for `Result<T, AppError>`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application-wide error type covering all error scenarios.
///
/// Each variant includes a descriptive `String` for context. The `#[error]`
/// attribute from `thiserror` provides the `Display` implementation.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error during startup or environment loading.
    ///
    /// **HTTP Status**: 500 Internal Server Error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document store error (connection, query, write).
    ///
    /// **HTTP Status**: 502 Bad Gateway (external service failure)
    #[error("Store error: {0}")]
    Store(String),

    /// Change notification stream failure.
    ///
    /// Fatal for the affected feed only; the owner reconnects with backoff.
    ///
    /// **HTTP Status**: 502 Bad Gateway
    #[error("Feed error: {0}")]
    Feed(String),

    /// A single viewer session's outbound delivery failed or timed out.
    ///
    /// Recovered by unregistering that session; never affects siblings.
    ///
    /// **HTTP Status**: 500 Internal Server Error
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// A single document failed transform or upsert against the index.
    ///
    /// Recovered by skip-and-log; does not abort the batch or stream.
    ///
    /// **HTTP Status**: 500 Internal Server Error
    #[error("Index write error: {0}")]
    IndexWrite(String),

    /// The index store is unreachable.
    ///
    /// Fatal to the synchronizer's current attempt; retried with backoff.
    ///
    /// **HTTP Status**: 502 Bad Gateway
    #[error("Index store unavailable: {0}")]
    IndexUnavailable(String),

    /// Data decoding error (bson, JSON, wire frames).
    ///
    /// **HTTP Status**: 400 Bad Request (if user-provided) or 500 (internal)
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Invalid user input validation error.
    ///
    /// **HTTP Status**: 400 Bad Request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource not found.
    ///
    /// **HTTP Status**: 404 Not Found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error (unexpected failures).
    ///
    /// **HTTP Status**: 500 Internal Server Error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Store(_) | AppError::Feed(_) | AppError::IndexUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Config(_)
            | AppError::Delivery(_)
            | AppError::IndexWrite(_)
            | AppError::Decoding(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message.
    ///
    /// For internal errors, returns a generic message to avoid exposing
    /// implementation details.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::Store(_) | AppError::Feed(_) | AppError::IndexUnavailable(_) => {
                "Service temporarily unavailable".to_string()
            }
            AppError::Config(_)
            | AppError::Delivery(_)
            | AppError::IndexWrite(_)
            | AppError::Decoding(_)
            | AppError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Implement Axum's `IntoResponse` for automatic error handling.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.user_message();

        // Log error details (full error message for server logs)
        match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                tracing::debug!("Client error: {}", self);
            }
            StatusCode::BAD_GATEWAY | StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("Server error: {}", self);
            }
            _ => {
                tracing::warn!("Unexpected error: {}", self);
            }
        }

        let error_code = match self {
            AppError::Config(_) => "Config",
            AppError::Store(_) => "Store",
            AppError::Feed(_) => "Feed",
            AppError::Delivery(_) => "Delivery",
            AppError::IndexWrite(_) => "IndexWrite",
            AppError::IndexUnavailable(_) => "IndexUnavailable",
            AppError::Decoding(_) => "Decoding",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::Internal(_) => "Internal",
        };

        let body = Json(json!({
            "error": message,
            "code": error_code,
        }));

        (status, body).into_response()
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert `mongodb::error::Error` to `AppError`.
impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Store(err.to_string())
    }
}

/// Convert `serde_json::Error` to `AppError`.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Decoding(format!("JSON error: {}", err))
    }
}

/// Convert bson serialization errors to `AppError`.
impl From<mongodb::bson::ser::Error> for AppError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        AppError::Decoding(format!("BSON error: {}", err))
    }
}

/// Convert bson deserialization errors to `AppError`.
impl From<mongodb::bson::de::Error> for AppError {
    fn from(err: mongodb::bson::de::Error) -> Self {
        AppError::Decoding(format!("BSON error: {}", err))
    }
}
