// ABOUTME: Centralized error handling and error types for the gateway
// ABOUTME: Defines the error taxonomy and its mapping onto HTTP statuses
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Async-IO.org

//! # Unified Error Handling
//!
//! Every failure of the transactional machinery (pool acquire, begin,
//! commit/rollback, directory, forwarding transport) maps to one of the
//! [`ErrorCode`] variants below and from there to an HTTP status. Individual
//! statement failures never surface here; they ride inside the response
//! body's `Error` field so callers can see which statement failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Standard error codes used throughout the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    /// Transaction id is unknown to this replica and the directory
    TxNotFound,
    /// Directory names this replica as owner but no local entry exists
    /// (name collision after a restart)
    TxNotFoundLocal,
    /// Waiting for a free backend session exceeded its budget
    PoolAcquireTimeout,
    /// The overall request budget elapsed
    RequestTimeout,
    /// Input validation failed
    InvalidInput,
    /// Authentication is required but not provided or wrong
    AuthRequired,
    /// Backend database operation failed
    DatabaseError,
    /// Shared directory operation failed
    DirectoryError,
    /// Configuration error occurred
    ConfigError,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::TxNotFound | Self::TxNotFoundLocal => StatusCode::NOT_FOUND,
            Self::PoolAcquireTimeout | Self::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            Self::InvalidInput => StatusCode::BAD_REQUEST,
            Self::AuthRequired => StatusCode::UNAUTHORIZED,
            Self::DatabaseError | Self::DirectoryError | Self::ConfigError | Self::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Application error: a code plus a human-readable message
#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create a new error with the given code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Unknown transaction id
    #[must_use]
    pub fn tx_not_found() -> Self {
        Self::new(ErrorCode::TxNotFound, "transaction not found, did it timeout?")
    }

    /// Directory points at this replica but the local registry has no entry
    #[must_use]
    pub fn tx_not_found_local() -> Self {
        Self::new(
            ErrorCode::TxNotFoundLocal,
            "transaction not found on its owning replica; the replica likely restarted under the same name, begin a new transaction",
        )
    }

    /// Pool acquisition exceeded its wait budget
    #[must_use]
    pub fn pool_timeout() -> Self {
        Self::new(
            ErrorCode::PoolAcquireTimeout,
            "timed out waiting for a free backend session",
        )
    }

    /// Overall request budget elapsed
    #[must_use]
    pub fn request_timeout() -> Self {
        Self::new(ErrorCode::RequestTimeout, "request deadline exceeded")
    }

    /// Input validation failure
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Authentication required or wrong
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "authentication required")
    }

    /// Backend database failure
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Shared directory failure
    #[must_use]
    pub fn directory(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DirectoryError, message)
    }

    /// Configuration failure
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Internal server error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

/// HTTP error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// RFC3339 timestamp when the error occurred
    pub timestamp: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        Self {
            code: error.code,
            message: error.message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::pool_timeout(),
            other => Self::database(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(error: redis::RedisError) -> Self {
        Self::directory(error.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {error}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::tx_not_found().code.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::tx_not_found_local().code.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::pool_timeout().code.http_status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            AppError::request_timeout().code.http_status(),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            AppError::invalid_input("x").code.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::auth_required().code.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::internal("x").code.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_pool_timeout_conversion() {
        let err = AppError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.code, ErrorCode::PoolAcquireTimeout);
    }

    #[test]
    fn test_not_found_message_mentions_timeout() {
        assert!(AppError::tx_not_found().message.contains("timeout"));
    }
}
