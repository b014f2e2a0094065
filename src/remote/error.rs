//! Mapping HTTP outcomes onto the engine's failure taxonomy.

use std::fmt;

use reqwest::StatusCode;

use crate::error::{FailureKind, NetworkFailure, SyncError};

/// Error answered by the board API.
///
/// Preserves the HTTP status so the failure can be classified.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code, if available
    pub status: Option<StatusCode>,
    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self.status,
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self.status,
            Some(StatusCode::REQUEST_TIMEOUT) | Some(StatusCode::GATEWAY_TIMEOUT)
        )
    }

    /// Classify this error.
    pub fn to_failure(&self) -> NetworkFailure {
        let kind = if self.is_permission_denied() {
            FailureKind::PermissionDenied
        } else if self.is_timeout() {
            FailureKind::TimedOut
        } else if self.status.is_some() {
            FailureKind::Rejected
        } else {
            FailureKind::Transport
        };
        NetworkFailure::new(kind, self.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({})", self.message, status.as_u16()),
            None => write!(f, "{}", self.message),
        }
    }
}

impl From<ApiError> for SyncError {
    fn from(error: ApiError) -> Self {
        SyncError::Network(error.to_failure())
    }
}

/// Classify a transport-level reqwest error.
pub fn failure_from_reqwest(error: &reqwest::Error) -> NetworkFailure {
    if error.is_timeout() {
        NetworkFailure::timed_out(error.to_string())
    } else if let Some(status) = error.status() {
        ApiError::with_status(error.to_string(), status).to_failure()
    } else {
        NetworkFailure::new(FailureKind::Transport, error.to_string())
    }
}
