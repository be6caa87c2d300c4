//! Error types for request coordination

use std::time::Duration;

use thiserror::Error;

/// Failure of a single transport attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Response body is not valid JSON: {0}")]
    Decode(String),
}

impl TransportError {
    /// Network and timeout failures, plus gateway statuses (502, 503, 504),
    /// are worth retrying. Any other response is an application answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout(_) => true,
            TransportError::Status { status, .. } => matches!(status, 502..=504),
            TransportError::Decode(_) => false,
        }
    }
}

/// Failure of a coordinated load.
///
/// Cloneable so every deduplicated waiter receives the same error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("{endpoint} failed after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        last: TransportError,
    },

    #[error("{endpoint} failed: {error}")]
    Application {
        endpoint: String,
        error: TransportError,
    },

    #[error("{endpoint} was cancelled while waiting for a slot")]
    Cancelled { endpoint: String },

    /// The request task died before settling (panic or runtime shutdown).
    #[error("{endpoint} was interrupted: {reason}")]
    Interrupted { endpoint: String, reason: String },
}

impl LoadError {
    pub fn endpoint(&self) -> &str {
        match self {
            LoadError::Exhausted { endpoint, .. }
            | LoadError::Application { endpoint, .. }
            | LoadError::Cancelled { endpoint }
            | LoadError::Interrupted { endpoint, .. } => endpoint,
        }
    }

    /// Whether the last attempt ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LoadError::Exhausted {
                last: TransportError::Timeout(_),
                ..
            }
        )
    }

    /// HTTP status of an application-level failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            LoadError::Application {
                error: TransportError::Status { status, .. },
                ..
            }
            | LoadError::Exhausted {
                last: TransportError::Status { status, .. },
                ..
            } => Some(*status),
            _ => None,
        }
    }
}
