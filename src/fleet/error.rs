// ABOUTME: Error taxonomy for the session fleet
//
// ErrorKind classifies failures for retry decisions and reporting.
// FleetError covers pool-level violations and programming errors; ordinary
// remote-endpoint failures are recorded on sessions and batch results instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::session::{SessionId, SessionState};

/// Classification of a failure, used by retry policies and health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts and transient network errors, eligible for retry
    RecoverableTransport,
    /// Credential or permission failures, never retried
    PermanentAuth,
    /// Pool is at max sessions
    CapacityExceeded,
    /// Malformed target or configuration
    InvalidConfiguration,
    /// Operation was cancelled before it settled
    Cancelled,
}

impl ErrorKind {
    /// Whether any retry policy may retry this kind of failure
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RecoverableTransport)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RecoverableTransport => "recoverable_transport",
            Self::PermanentAuth => "permanent_auth",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Errors returned by fleet-level operations
#[derive(Debug, Clone, Error)]
pub enum FleetError {
    /// Pool already holds its maximum number of sessions
    #[error("Session pool at capacity: max {max}")]
    CapacityExceeded { max: usize },

    /// Target or configuration rejected before any connect attempt
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No session with this id
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Pool was disposed; no further fleet operations are accepted
    #[error("Session pool has been disposed")]
    PoolDisposed,

    /// Requested state change is not an edge of the session state graph
    #[error("Invalid transition for session {id}: {from} -> {to}")]
    InvalidTransition {
        id: SessionId,
        from: SessionState,
        to: SessionState,
    },

    /// Bounded queue is full and the caller asked not to wait
    #[error("Queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    /// Batcher no longer accepts input
    #[error("Batcher is closed")]
    BatcherClosed,

    /// Secret store failure
    #[error("Secret store error: {0}")]
    Secret(String),
}

impl FleetError {
    /// Map onto the shared failure taxonomy
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::CapacityExceeded { .. } | Self::QueueFull { .. } => ErrorKind::CapacityExceeded,
            Self::Secret(_) => ErrorKind::PermanentAuth,
            Self::PoolDisposed | Self::BatcherClosed => ErrorKind::Cancelled,
            Self::InvalidConfiguration(_)
            | Self::SessionNotFound(_)
            | Self::InvalidTransition { .. } => ErrorKind::InvalidConfiguration,
        }
    }
}

/// Result type for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;
