// ABOUTME: Observer fan-out for session state changes, timeouts, failures and health
// ABOUTME: Registry owned by the pool; notifications iterate a snapshot so one bad observer cannot affect the rest

//! Observer notifications.
//!
//! Listeners implement [`SessionObserver`] and are attached to the pool's
//! [`ObserverRegistry`]. Provided listeners:
//!
//! - [`LoggingObserver`]: structured `tracing` events
//! - [`StatsObserver`]: counters per transition target and failure kind
//! - [`ChannelObserver`]: typed [`FleetEvent`] stream over a bounded channel
//! - [`EventLogObserver`]: JSON event lines coalesced through a `MicroBatcher`

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::batcher::{BatcherConfig, MicroBatcher};
use super::error::{ErrorKind, FleetResult};
use super::health::HealthSnapshot;
use super::session::{SessionId, SessionInfo, SessionState};

/// A failed operation that did not surface as an error to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
    pub session_id: Option<SessionId>,
    pub operation: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Listener for fleet notifications
///
/// Callbacks run synchronously on the notifying task; keep them short.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, session: &SessionInfo, old: SessionState, new: SessionState);

    fn on_timeout(&self, _session: &SessionInfo, _details: &str) {}

    fn on_operation_failed(&self, _failure: &OperationFailure) {}

    fn on_health(&self, _snapshot: &HealthSnapshot) {}
}

// === Registry ===

/// Set of attached observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn SessionObserver>>>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}

fn same_observer(a: &Arc<dyn SessionObserver>, b: &Arc<dyn SessionObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer; returns false if it was already attached
    pub fn attach(&self, observer: Arc<dyn SessionObserver>) -> bool {
        let mut observers = self.observers.write();
        if observers.iter().any(|o| same_observer(o, &observer)) {
            return false;
        }
        observers.push(observer);
        true
    }

    /// Detach an observer; returns false if it was not attached
    pub fn detach(&self, observer: &Arc<dyn SessionObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    fn dispatch(&self, event: &'static str, notify: impl Fn(&dyn SessionObserver)) {
        // Snapshot so observers may attach/detach from inside a callback
        let observers: Vec<Arc<dyn SessionObserver>> = self.observers.read().clone();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| notify(observer.as_ref()))).is_err() {
                error!(event, "Observer panicked during notification");
            }
        }
    }

    pub fn notify_state_changed(&self, session: &SessionInfo, old: SessionState, new: SessionState) {
        self.dispatch("state_changed", |o| o.on_state_changed(session, old, new));
    }

    pub fn notify_timeout(&self, session: &SessionInfo, details: &str) {
        self.dispatch("timeout", |o| o.on_timeout(session, details));
    }

    pub fn notify_operation_failed(&self, failure: &OperationFailure) {
        self.dispatch("operation_failed", |o| o.on_operation_failed(failure));
    }

    pub fn notify_health(&self, snapshot: &HealthSnapshot) {
        self.dispatch("health", |o| o.on_health(snapshot));
    }
}

// === Typed Events ===

/// Owned form of a notification, for channels and event logs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    StateChanged {
        session_id: SessionId,
        target: String,
        old: SessionState,
        new: SessionState,
        at: DateTime<Utc>,
    },
    Timeout {
        session_id: SessionId,
        target: String,
        details: String,
        at: DateTime<Utc>,
    },
    OperationFailed {
        #[serde(flatten)]
        failure: OperationFailure,
        at: DateTime<Utc>,
    },
    Health {
        snapshot: HealthSnapshot,
    },
}

impl FleetEvent {
    fn state_changed(session: &SessionInfo, old: SessionState, new: SessionState) -> Self {
        Self::StateChanged {
            session_id: session.id,
            target: session.target.to_string(),
            old,
            new,
            at: Utc::now(),
        }
    }

    fn timeout(session: &SessionInfo, details: &str) -> Self {
        Self::Timeout {
            session_id: session.id,
            target: session.target.to_string(),
            details: details.to_string(),
            at: Utc::now(),
        }
    }

    fn operation_failed(failure: &OperationFailure) -> Self {
        Self::OperationFailed {
            failure: failure.clone(),
            at: Utc::now(),
        }
    }
}

// === Logging Observer ===

/// Emits every notification as a structured `tracing` event
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl SessionObserver for LoggingObserver {
    fn on_state_changed(&self, session: &SessionInfo, old: SessionState, new: SessionState) {
        match new {
            SessionState::Error => warn!(
                session = %session.id,
                endpoint = %session.target,
                %old,
                %new,
                failure = ?session.stats.last_failure.as_ref().map(|f| &f.message),
                "Session entered error state"
            ),
            SessionState::Connected | SessionState::Disconnected | SessionState::Disposed => info!(
                session = %session.id,
                endpoint = %session.target,
                %old,
                %new,
                "Session state changed"
            ),
            _ => debug!(session = %session.id, %old, %new, "Session state changed"),
        }
    }

    fn on_timeout(&self, session: &SessionInfo, details: &str) {
        warn!(session = %session.id, endpoint = %session.target, details, "Session timeout");
    }

    fn on_operation_failed(&self, failure: &OperationFailure) {
        warn!(
            session = ?failure.session_id,
            operation = %failure.operation,
            kind = %failure.kind,
            error = %failure.message,
            "Operation failed"
        );
    }

    fn on_health(&self, snapshot: &HealthSnapshot) {
        info!(
            total = snapshot.total_sessions,
            connected = snapshot.connected,
            retries = snapshot.total_retries,
            "Fleet health"
        );
    }
}

// === Stats Observer ===

/// Counts notifications for dashboards and tests
#[derive(Debug, Default)]
pub struct StatsObserver {
    entered: Mutex<HashMap<SessionState, u64>>,
    failures: Mutex<HashMap<ErrorKind, u64>>,
    timeouts: AtomicU64,
    health_reports: AtomicU64,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transitions into `state`
    pub fn entered(&self, state: SessionState) -> u64 {
        self.entered.lock().get(&state).copied().unwrap_or(0)
    }

    pub fn failures(&self, kind: ErrorKind) -> u64 {
        self.failures.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn health_reports(&self) -> u64 {
        self.health_reports.load(Ordering::Relaxed)
    }
}

impl SessionObserver for StatsObserver {
    fn on_state_changed(&self, _session: &SessionInfo, _old: SessionState, new: SessionState) {
        *self.entered.lock().entry(new).or_insert(0) += 1;
    }

    fn on_timeout(&self, _session: &SessionInfo, _details: &str) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn on_operation_failed(&self, failure: &OperationFailure) {
        *self.failures.lock().entry(failure.kind).or_insert(0) += 1;
    }

    fn on_health(&self, _snapshot: &HealthSnapshot) {
        self.health_reports.fetch_add(1, Ordering::Relaxed);
    }
}

// === Channel Observer ===

/// Forwards notifications as [`FleetEvent`]s over a bounded channel
///
/// Events are dropped (and counted) when the receiver falls behind; the
/// notifying session is never blocked.
pub struct ChannelObserver {
    tx: mpsc::Sender<FleetEvent>,
    capacity: usize,
    dropped: AtomicU64,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<FleetEvent>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                capacity,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, event: FleetEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(capacity = self.capacity, dropped, "Event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Event channel closed");
            }
        }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_state_changed(&self, session: &SessionInfo, old: SessionState, new: SessionState) {
        self.send(FleetEvent::state_changed(session, old, new));
    }

    fn on_timeout(&self, session: &SessionInfo, details: &str) {
        self.send(FleetEvent::timeout(session, details));
    }

    fn on_operation_failed(&self, failure: &OperationFailure) {
        self.send(FleetEvent::operation_failed(failure));
    }

    fn on_health(&self, snapshot: &HealthSnapshot) {
        self.send(FleetEvent::Health {
            snapshot: snapshot.clone(),
        });
    }
}

// === Event Log Observer ===

/// Writes notifications as JSON lines, coalesced into batches
///
/// The sink receives whole batches so it can write them with one call. Must be
/// created inside a tokio runtime.
pub struct EventLogObserver {
    batcher: MicroBatcher<String>,
    dropped: AtomicU64,
}

impl EventLogObserver {
    pub fn new<S>(config: BatcherConfig, mut sink: S) -> FleetResult<Self>
    where
        S: FnMut(Vec<String>) + Send + 'static,
    {
        let batcher = MicroBatcher::new(config, move |lines: Vec<String>| {
            sink(lines);
            std::future::ready(Ok(()))
        })?;
        Ok(Self {
            batcher,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Flush pending lines and stop the batcher
    pub async fn complete(&self) {
        self.batcher.complete().await;
    }

    fn log(&self, event: &FleetEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize fleet event");
                return;
            }
        };
        if self.batcher.try_enqueue(line).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl SessionObserver for EventLogObserver {
    fn on_state_changed(&self, session: &SessionInfo, old: SessionState, new: SessionState) {
        self.log(&FleetEvent::state_changed(session, old, new));
    }

    fn on_timeout(&self, session: &SessionInfo, details: &str) {
        self.log(&FleetEvent::timeout(session, details));
    }

    fn on_operation_failed(&self, failure: &OperationFailure) {
        self.log(&FleetEvent::operation_failed(failure));
    }

    fn on_health(&self, snapshot: &HealthSnapshot) {
        self.log(&FleetEvent::Health {
            snapshot: snapshot.clone(),
        });
    }
}
