use std::fmt;

use serde::Deserialize;
use thiserror::Error;

/// Why a REST call did not produce an authoritative answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The server answered with a non-success status.
    Rejected,
    /// The request did not complete in time.
    TimedOut,
    /// The server refused the caller (401/403).
    PermissionDenied,
    /// The request never reached the server or the response was unreadable.
    Transport,
}

enum_display!(FailureKind, {
    Rejected => "rejected",
    TimedOut => "timed out",
    PermissionDenied => "permission denied",
    Transport => "transport error",
});

/// A failed REST round trip. Always recoverable by re-issuing the gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl NetworkFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(FailureKind::PermissionDenied, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TimedOut, message)
    }
}

impl fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("ticket '{0}' not found")]
    TicketNotFound(String),

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("board '{0}' not found")]
    BoardNotFound(String),

    #[error("request failed ({0})")]
    Network(NetworkFailure),

    #[error("stale signal for '{0}' discarded")]
    ConflictStale(String),

    #[error("current user may not {0}")]
    PermissionDenied(String),

    #[error("invalid event kind '{0}'")]
    InvalidEventKind(String),

    #[error("invalid priority '{0}'")]
    InvalidPriority(String),

    #[error("invalid ticket type '{0}'")]
    InvalidTicketType(String),

    #[error("malformed realtime frame: {0}")]
    MalformedFrame(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    pub fn invalid_event_kind(s: String) -> Self {
        SyncError::InvalidEventKind(s)
    }

    pub fn invalid_priority(s: String) -> Self {
        SyncError::InvalidPriority(s)
    }

    pub fn invalid_ticket_type(s: String) -> Self {
        SyncError::InvalidTicketType(s)
    }

    /// The network failure behind this error, if it is one.
    pub fn as_network(&self) -> Option<&NetworkFailure> {
        match self {
            SyncError::Network(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether this error should roll back optimistic state and be shown to the user.
    pub fn is_network_failure(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::Http(_))
    }
}

impl From<NetworkFailure> for SyncError {
    fn from(failure: NetworkFailure) -> Self {
        SyncError::Network(failure)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
