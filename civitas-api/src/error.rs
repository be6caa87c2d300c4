//! Error Types for CIVITAS API
//!
//! `ApiError` carries an `ErrorCode` that decides the HTTP status. Every
//! error leaves the server as a JSON body of the form
//! `{"code": "...", "message": "...", "details": ...}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use civitas_core::{CivitasError, ComputeError, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Client Errors (400, 404, 409)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Aggregate key is not one the builder knows
    UnknownAggregate,

    /// A sync run is already in progress
    SyncInProgress,

    // ========================================================================
    // Server Errors (500, 502, 503)
    // ========================================================================
    /// Aggregate query against the record source failed
    ComputeFailed,

    /// Import pipeline could not start or exited non-zero
    ImportFailed,

    /// Some aggregate keys could not be rebuilt
    RebuildIncomplete,

    /// Cache storage is unavailable
    ServiceUnavailable,

    /// Invalid server configuration
    ConfigError,

    /// Internal server error
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::UnknownAggregate => StatusCode::NOT_FOUND,
            ErrorCode::SyncInProgress => StatusCode::CONFLICT,
            ErrorCode::ImportFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::ComputeFailed
            | ErrorCode::RebuildIncomplete
            | ErrorCode::ConfigError
            | ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::UnknownAggregate => "Aggregate not found",
            ErrorCode::SyncInProgress => "A sync run is already in progress",
            ErrorCode::ComputeFailed => "Aggregate computation failed",
            ErrorCode::ImportFailed => "Import pipeline failed",
            ErrorCode::RebuildIncomplete => "Cache rebuild incomplete",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConfigError => "Invalid server configuration",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn unknown_aggregate(key: &str) -> Self {
        Self::new(
            ErrorCode::UnknownAggregate,
            format!("Unknown aggregate key '{}'", key),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<CivitasError> for ApiError {
    fn from(err: CivitasError) -> Self {
        let message = err.to_string();
        match err {
            CivitasError::Storage(_) => Self::new(ErrorCode::ServiceUnavailable, message),
            CivitasError::Config(_) => Self::new(ErrorCode::ConfigError, message),
            CivitasError::Compute(ComputeError::UnknownKey { key }) => Self::unknown_aggregate(&key),
            CivitasError::Compute(_) => Self::new(ErrorCode::ComputeFailed, message),
            CivitasError::Sync(SyncError::AlreadyRunning) => {
                Self::from_code(ErrorCode::SyncInProgress)
            }
            CivitasError::Sync(SyncError::ImportSpawn { .. } | SyncError::ImportFailed { .. }) => {
                Self::new(ErrorCode::ImportFailed, message)
            }
            CivitasError::Sync(SyncError::RebuildIncomplete { failed }) => {
                Self::new(ErrorCode::RebuildIncomplete, message)
                    .with_details(serde_json::json!({ "failed": failed }))
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::internal_error(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = %self.code, message = %self.message, "Request failed");
        } else {
            tracing::debug!(code = %self.code, message = %self.message, "Request rejected");
        }
        (status, Json(self)).into_response()
    }
}
