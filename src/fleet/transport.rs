// ABOUTME: Transport capability consumed by sessions
//
// The fleet never interprets transport payloads. It only observes connect
// success/failure, aliveness and an opaque stats snapshot. Each transport
// supplies its own failure classification because permanent-failure
// categories differ between protocols.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::error::{ErrorKind, FleetResult};
use super::target::TargetDescriptor;

/// Failure reported by a transport
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    hint: Option<ErrorKind>,
}

impl TransportError {
    /// Unclassified failure; the transport's `classify` decides its kind
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: None,
        }
    }

    /// Failure the transport already knows the kind of
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: Some(kind),
        }
    }

    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::RecoverableTransport, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::PermanentAuth, message)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::with_kind(
            ErrorKind::InvalidConfiguration,
            format!("transport does not support {operation}"),
        )
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn hint(&self) -> Option<ErrorKind> {
        self.hint
    }
}

/// A single remote connection as seen by the fleet
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection; the session also enforces `timeout` itself
    async fn connect(
        &self,
        target: &TargetDescriptor,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Tear the connection down
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Whether the remote side is still there
    fn is_alive(&self) -> bool;

    /// Opaque transport statistics
    fn snapshot(&self) -> serde_json::Value;

    /// Apply a configuration object to a live connection
    async fn reconfigure(&self, _config: &serde_json::Value) -> Result<(), TransportError> {
        Err(TransportError::unsupported("reconfigure"))
    }

    /// Classify a failure for retry decisions
    fn classify(&self, error: &TransportError) -> ErrorKind {
        error.hint().unwrap_or(ErrorKind::RecoverableTransport)
    }
}

/// Builds one transport per session
pub trait TransportFactory: Send + Sync {
    fn create(&self, target: &TargetDescriptor) -> FleetResult<Arc<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(&TargetDescriptor) -> FleetResult<Arc<dyn Transport>> + Send + Sync,
{
    fn create(&self, target: &TargetDescriptor) -> FleetResult<Arc<dyn Transport>> {
        self(target)
    }
}
