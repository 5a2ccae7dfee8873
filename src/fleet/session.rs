// ABOUTME: Managed session with its connection state machine
// ABOUTME: Connect/retry/disconnect/dispose are serialized per session and every transition is published to observers

//! A `Session` is one managed connection to a remote target.
//!
//! State graph:
//!
//! ```text
//!             ┌──────────── Retrying ◀──┐
//!             ▼                │        │
//!  Idle ──▶ Connecting ────────┼────────┘
//!             │    │           ▼
//!             │    └──────▶  Error ──┐
//!             ▼                      │ (reconnect)
//!         Connected ──▶ Disconnected ┤
//!                                    ▼
//!                               Connecting
//!
//!  any non-terminal state ──▶ Disposed
//! ```
//!
//! Only the owning pool drives transitions. Callers read state through
//! [`Session::state`] and [`Session::info`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{ErrorKind, FleetError, FleetResult};
use super::metrics::FleetMetrics;
use super::observer::{ObserverRegistry, OperationFailure};
use super::retry::RetryPolicy;
use super::target::TargetDescriptor;
use super::transport::Transport;

// === Session ID ===

/// Identifier of a session, unique within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// === Session State ===

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Retrying,
    Disconnected,
    Error,
    Disposed,
}

impl SessionState {
    pub const ALL: [Self; 7] = [
        Self::Idle,
        Self::Connecting,
        Self::Connected,
        Self::Retrying,
        Self::Disconnected,
        Self::Error,
        Self::Disposed,
    ];

    /// Whether `next` is an edge of the state graph from `self`
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Disposed, _) => false,
            (_, Self::Disposed) => true,
            (Self::Idle | Self::Retrying | Self::Disconnected | Self::Error, Self::Connecting) => {
                true
            }
            (Self::Connecting, Self::Connected | Self::Retrying | Self::Error) => true,
            (Self::Retrying, Self::Error) => true,
            (Self::Connected, Self::Disconnected) => true,
            _ => false,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// States eligible for inactive-session cleanup
    pub const fn is_inactive(self) -> bool {
        matches!(self, Self::Error | Self::Disconnected)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Disposed => "disposed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === Stats ===

/// Last failure recorded on a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Cumulative per-session statistics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub connected_since: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
    pub total_retries: u64,
    pub connect_attempts: u64,
    pub last_failure: Option<SessionFailure>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            connected_since: None,
            last_activity: Utc::now(),
            total_retries: 0,
            connect_attempts: 0,
            last_failure: None,
        }
    }
}

/// Read-only snapshot of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub target: TargetDescriptor,
    pub state: SessionState,
    pub retry_count: u32,
    pub stats: SessionStats,
    /// How long the session has been in its current state
    pub time_in_state: Duration,
    /// How long the session has been connected, if it is
    pub connected_for: Option<Duration>,
}

// === Session ===

struct SessionCore {
    state: SessionState,
    retry_count: u32,
    state_entered: Instant,
    connected_at: Option<Instant>,
    stats: SessionStats,
}

/// Everything a connect needs from the pool
pub(crate) struct ConnectContext<'a> {
    pub policy: &'a dyn RetryPolicy,
    pub timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub observers: &'a ObserverRegistry,
    pub metrics: &'a FleetMetrics,
}

/// One managed connection
pub struct Session {
    id: SessionId,
    target: TargetDescriptor,
    transport: Arc<dyn Transport>,
    core: RwLock<SessionCore>,
    /// Serializes connect/disconnect/liveness/dispose on this session
    op_lock: Mutex<()>,
    /// Child of the pool token; cancelled on dispose
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        target: TargetDescriptor,
        transport: Arc<dyn Transport>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            target,
            transport,
            core: RwLock::new(SessionCore {
                state: SessionState::Idle,
                retry_count: 0,
                state_entered: Instant::now(),
                connected_at: None,
                stats: SessionStats::default(),
            }),
            op_lock: Mutex::new(()),
            cancel,
        }
    }

    pub const fn id(&self) -> SessionId {
        self.id
    }

    pub const fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.core.read().state
    }

    pub fn retry_count(&self) -> u32 {
        self.core.read().retry_count
    }

    pub fn time_in_state(&self) -> Duration {
        self.core.read().state_entered.elapsed()
    }

    pub fn info(&self) -> SessionInfo {
        let core = self.core.read();
        self.info_from(&core)
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Opaque transport statistics
    pub fn transport_snapshot(&self) -> serde_json::Value {
        self.transport.snapshot()
    }

    fn info_from(&self, core: &SessionCore) -> SessionInfo {
        SessionInfo {
            id: self.id,
            target: self.target.clone(),
            state: core.state,
            retry_count: core.retry_count,
            stats: core.stats.clone(),
            time_in_state: core.state_entered.elapsed(),
            connected_for: core.connected_at.map(|at| at.elapsed()),
        }
    }

    /// Apply one edge of the state graph and publish it
    ///
    /// Observers are notified after the state lock is released but before this
    /// returns, so they never see a stale state through `state()`.
    pub(crate) fn transition(
        &self,
        to: SessionState,
        observers: &ObserverRegistry,
    ) -> FleetResult<()> {
        let (from, info) = {
            let mut core = self.core.write();
            let from = core.state;
            if !from.can_transition_to(to) {
                return Err(FleetError::InvalidTransition {
                    id: self.id,
                    from,
                    to,
                });
            }

            let now = Instant::now();
            core.state = to;
            core.state_entered = now;
            core.stats.last_activity = Utc::now();
            if to == SessionState::Connected {
                core.connected_at = Some(now);
                core.stats.connected_since = Some(core.stats.last_activity);
            } else if from == SessionState::Connected {
                core.connected_at = None;
                core.stats.connected_since = None;
            }
            (from, self.info_from(&core))
        };

        debug!(session = %self.id, endpoint = %self.target, %from, %to, "Session state changed");
        observers.notify_state_changed(&info, from, to);
        Ok(())
    }

    /// Record activity on the session (successful broadcast, keepalive)
    pub(crate) fn touch(&self) {
        self.core.write().stats.last_activity = Utc::now();
    }

    fn record_failure(&self, kind: ErrorKind, message: &str) {
        self.core.write().stats.last_failure = Some(SessionFailure {
            kind,
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    fn fail(&self, kind: ErrorKind, message: &str, ctx: &ConnectContext<'_>) -> bool {
        self.record_failure(kind, message);
        ctx.metrics.record_connect_failure();
        // Only reachable from Connecting/Retrying, both of which may enter Error
        let _ = self.transition(SessionState::Error, ctx.observers);
        false
    }

    /// Drive the session to `Connected`, retrying per policy
    ///
    /// Returns whether the session ended connected. Failures are recorded on the
    /// session, never returned.
    pub(crate) async fn connect(&self, ctx: &ConnectContext<'_>) -> bool {
        let _op = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => return false,
            () = self.cancel.cancelled() => return false,
            guard = self.op_lock.lock() => guard,
        };

        match self.state() {
            SessionState::Connected => return true,
            SessionState::Disposed => return false,
            _ => {}
        }

        self.core.write().retry_count = 0;

        loop {
            if let Err(e) = self.transition(SessionState::Connecting, ctx.observers) {
                warn!(session = %self.id, error = %e, "Cannot start connect");
                return false;
            }
            self.core.write().stats.connect_attempts += 1;

            let attempt = {
                let _in_flight = ctx.metrics.connect_started();
                tokio::select! {
                    biased;
                    () = ctx.cancel.cancelled() => None,
                    () = self.cancel.cancelled() => None,
                    result = tokio::time::timeout(
                        ctx.timeout,
                        self.transport.connect(&self.target, ctx.timeout),
                    ) => Some(result),
                }
            };

            let (kind, message) = match attempt {
                None => return self.fail(ErrorKind::Cancelled, "connect cancelled", ctx),
                Some(Ok(Ok(()))) => {
                    self.core.write().retry_count = 0;
                    ctx.metrics.record_connect_success();
                    let _ = self.transition(SessionState::Connected, ctx.observers);
                    info!(session = %self.id, endpoint = %self.target, "Session connected");
                    return true;
                }
                Some(Ok(Err(e))) => (self.transport.classify(&e), e.message().to_string()),
                Some(Err(_elapsed)) => {
                    let details = format!(
                        "connect to {} timed out after {:?}",
                        self.target, ctx.timeout
                    );
                    ctx.observers.notify_timeout(&self.info(), &details);
                    (ErrorKind::RecoverableTransport, details)
                }
            };

            let retry_count = self.retry_count();
            if !ctx.policy.should_retry(kind) || retry_count >= ctx.policy.max_retry_attempts() {
                warn!(
                    session = %self.id,
                    endpoint = %self.target,
                    %kind,
                    retries = retry_count,
                    error = %message,
                    "Session connect failed"
                );
                return self.fail(kind, &message, ctx);
            }

            let attempt = retry_count + 1;
            {
                let mut core = self.core.write();
                core.retry_count = attempt;
                core.stats.total_retries += 1;
            }
            self.record_failure(kind, &message);
            ctx.metrics.record_retry();
            let _ = self.transition(SessionState::Retrying, ctx.observers);

            let delay = ctx.policy.retry_delay(attempt);
            debug!(
                session = %self.id,
                attempt,
                delay_ms = %delay.as_millis(),
                error = %message,
                "Retrying connect with backoff"
            );

            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => {
                    return self.fail(ErrorKind::Cancelled, "retry wait cancelled", ctx);
                }
                () = self.cancel.cancelled() => {
                    return self.fail(ErrorKind::Cancelled, "retry wait cancelled", ctx);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Disconnect if connected; returns whether a disconnect happened
    ///
    /// A transport error during disconnect is reported to observers but the
    /// session still ends `Disconnected`.
    pub(crate) async fn disconnect(&self, observers: &ObserverRegistry) -> bool {
        let _op = self.op_lock.lock().await;
        self.disconnect_locked(observers).await
    }

    async fn disconnect_locked(&self, observers: &ObserverRegistry) -> bool {
        if self.state() != SessionState::Connected {
            return false;
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!(session = %self.id, error = %e, "Transport disconnect failed");
            observers.notify_operation_failed(&OperationFailure {
                session_id: Some(self.id),
                operation: "disconnect".to_string(),
                kind: self.transport.classify(&e),
                message: e.message().to_string(),
            });
        }

        let _ = self.transition(SessionState::Disconnected, observers);
        info!(session = %self.id, endpoint = %self.target, "Session disconnected");
        true
    }

    /// Mark a connected session whose transport died as `Disconnected`
    ///
    /// Sessions busy with another operation are skipped. Returns true when the
    /// session was found dead.
    pub(crate) fn check_liveness(&self, observers: &ObserverRegistry) -> bool {
        let Ok(_op) = self.op_lock.try_lock() else {
            return false;
        };
        if self.state() != SessionState::Connected || self.transport.is_alive() {
            return false;
        }

        self.record_failure(ErrorKind::RecoverableTransport, "transport terminated");
        let _ = self.transition(SessionState::Disconnected, observers);
        warn!(session = %self.id, endpoint = %self.target, "Session transport terminated");
        true
    }

    /// Disconnect if live and enter the terminal `Disposed` state
    pub(crate) async fn dispose(&self, observers: &ObserverRegistry) {
        self.cancel.cancel();
        let _op = self.op_lock.lock().await;
        if self.state().is_terminal() {
            return;
        }
        self.disconnect_locked(observers).await;
        let _ = self.transition(SessionState::Disposed, observers);
    }

    /// Dispose only if still `Error`/`Disconnected` for longer than `grace`
    ///
    /// The check runs under the op lock, so a session that reconnected after it
    /// was picked for cleanup is kept.
    pub(crate) async fn dispose_if_inactive(
        &self,
        grace: Duration,
        observers: &ObserverRegistry,
    ) -> bool {
        let _op = self.op_lock.lock().await;
        if !self.state().is_inactive() || self.time_in_state() <= grace {
            return false;
        }
        self.cancel.cancel();
        let _ = self.transition(SessionState::Disposed, observers);
        true
    }
}
