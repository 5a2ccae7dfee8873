// ABOUTME: Batch operations fanned out to many sessions with per-target outcome isolation
// ABOUTME: One task per target; errors, panics and cancellation become entries in the BatchResult

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::artifact_cache::ArtifactCache;
use super::error::{ErrorKind, FleetError, FleetResult};
use super::health::HealthSnapshot;
use super::observer::OperationFailure;
use super::pool::SessionPool;
use super::session::{Session, SessionId, SessionState};
use super::target::TargetDescriptor;
use super::transport::{Transport, TransportError};

// === Results ===

/// Why one target of a batch failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl BatchFailure {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome for one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetOutcome<T = ()> {
    pub value: Option<T>,
    pub error: Option<BatchFailure>,
}

impl<T> TargetOutcome<T> {
    fn success(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    fn failure(failure: BatchFailure) -> Self {
        Self {
            value: None,
            error: Some(failure),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-target outcomes of one batch call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult<T = ()> {
    outcomes: HashMap<SessionId, TargetOutcome<T>>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            outcomes: HashMap::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when every target succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(TargetOutcome::is_success)
    }

    pub fn success_count(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.len() - self.success_count()
    }

    pub fn get(&self, id: SessionId) -> Option<&TargetOutcome<T>> {
        self.outcomes.get(&id)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (SessionId, &TargetOutcome<T>)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    pub fn failures(&self) -> impl Iterator<Item = (SessionId, &BatchFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.error.as_ref().map(|e| (*id, e)))
    }

    /// Successful values keyed by session
    pub fn into_values(self) -> HashMap<SessionId, T> {
        self.outcomes
            .into_iter()
            .filter_map(|(id, outcome)| outcome.value.map(|v| (id, v)))
            .collect()
    }

    fn record(&mut self, id: SessionId, outcome: TargetOutcome<T>) {
        self.outcomes.insert(id, outcome);
    }
}

// === Operation Context ===

/// What a batch operation gets to work with for one target
#[derive(Clone)]
pub struct SessionContext {
    pub id: SessionId,
    pub target: TargetDescriptor,
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

// === Batch Operator ===

/// Runs operations against many sessions of a pool at once
#[derive(Debug, Clone)]
pub struct BatchOperator {
    pool: Arc<SessionPool>,
}

impl BatchOperator {
    pub const fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    pub const fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Run `operation` on the named sessions, or every connected one if `target_ids` is empty
    pub async fn broadcast<F, Fut>(
        &self,
        operation: F,
        target_ids: &[SessionId],
    ) -> FleetResult<BatchResult>
    where
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        self.run(operation, target_ids, None).await
    }

    /// Cancellable [`broadcast`](Self::broadcast); targets still pending get a `Cancelled` entry
    pub async fn broadcast_with<F, Fut>(
        &self,
        operation: F,
        target_ids: &[SessionId],
        cancel: &CancellationToken,
    ) -> FleetResult<BatchResult>
    where
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        self.run(operation, target_ids, Some(cancel)).await
    }

    /// Like [`broadcast`](Self::broadcast) but keeps each target's returned value
    pub async fn broadcast_collect<T, F, Fut>(
        &self,
        operation: F,
        target_ids: &[SessionId],
    ) -> FleetResult<BatchResult<T>>
    where
        T: Send + 'static,
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        self.run(operation, target_ids, None).await
    }

    /// Apply `config` to each target's transport; returns how many accepted it
    ///
    /// Failures are reported to the pool's observers and never stop the rest.
    pub async fn reconfigure_all(
        &self,
        config: &serde_json::Value,
        target_ids: &[SessionId],
    ) -> FleetResult<usize> {
        let config = Arc::new(config.clone());
        let result = self
            .broadcast(
                move |ctx: SessionContext| {
                    let config = Arc::clone(&config);
                    async move { ctx.transport.reconfigure(&config).await }
                },
                target_ids,
            )
            .await?;

        for (id, failure) in result.failures() {
            self.pool.observers().notify_operation_failed(&OperationFailure {
                session_id: Some(id),
                operation: "reconfigure".to_string(),
                kind: failure.kind,
                message: failure.message.clone(),
            });
        }

        let applied = result.success_count();
        info!(applied, failed = result.failure_count(), "Reconfigured sessions");
        Ok(applied)
    }

    /// Aggregate fleet health; no side effects
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::capture(&self.pool)
    }

    /// Broadcast an artifact-producing operation and cache each returned artifact under `name`
    ///
    /// The value for each successful target is the artifact size in bytes.
    pub async fn capture_artifacts<F, Fut>(
        &self,
        name: &str,
        operation: F,
        target_ids: &[SessionId],
        cache: &ArtifactCache,
    ) -> FleetResult<BatchResult<usize>>
    where
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, TransportError>> + Send + 'static,
    {
        let captured = self.broadcast_collect(operation, target_ids).await?;

        let mut result = BatchResult::default();
        for (id, outcome) in captured.outcomes {
            let outcome = match (outcome.value, outcome.error) {
                (Some(bytes), None) => {
                    cache.insert(id, name, &bytes);
                    TargetOutcome::success(bytes.len())
                }
                (_, Some(failure)) => TargetOutcome::failure(failure),
                (None, None) => TargetOutcome::failure(BatchFailure::new(
                    ErrorKind::RecoverableTransport,
                    "operation returned no artifact",
                )),
            };
            result.record(id, outcome);
        }
        Ok(result)
    }

    /// Sessions to run on, plus failure entries for named targets that cannot run
    fn resolve_targets<T>(
        &self,
        target_ids: &[SessionId],
        result: &mut BatchResult<T>,
    ) -> Vec<Arc<Session>> {
        if target_ids.is_empty() {
            return self
                .pool
                .sessions()
                .into_iter()
                .filter(|s| s.state() == SessionState::Connected)
                .collect();
        }

        let mut seen = HashSet::new();
        let mut sessions = Vec::with_capacity(target_ids.len());
        for &id in target_ids {
            if !seen.insert(id) {
                continue;
            }
            match self.pool.get(id) {
                None => result.record(
                    id,
                    TargetOutcome::failure(BatchFailure::new(
                        ErrorKind::InvalidConfiguration,
                        FleetError::SessionNotFound(id).to_string(),
                    )),
                ),
                Some(session) if session.state() != SessionState::Connected => result.record(
                    id,
                    TargetOutcome::failure(BatchFailure::new(
                        ErrorKind::RecoverableTransport,
                        format!("session {id} is {}", session.state()),
                    )),
                ),
                Some(session) => sessions.push(session),
            }
        }
        sessions
    }

    async fn run<T, F, Fut>(
        &self,
        operation: F,
        target_ids: &[SessionId],
        cancel: Option<&CancellationToken>,
    ) -> FleetResult<BatchResult<T>>
    where
        T: Send + 'static,
        F: Fn(SessionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        if self.pool.is_disposed() {
            return Err(FleetError::PoolDisposed);
        }

        let mut result = BatchResult::default();
        let sessions = self.resolve_targets(target_ids, &mut result);
        let operation = Arc::new(operation);

        let tasks: Vec<(Arc<Session>, JoinHandle<Result<T, TransportError>>)> = sessions
            .into_iter()
            .map(|session| {
                let ctx = SessionContext {
                    id: session.id(),
                    target: session.target().clone(),
                    transport: session.transport(),
                };
                let operation = Arc::clone(&operation);
                // Called inside the task so a panic while building the future is contained too
                let handle = tokio::spawn(async move { operation(ctx).await });
                (session, handle)
            })
            .collect();

        debug!(targets = tasks.len(), "Broadcast started");

        let mut cancelled = false;
        for (session, mut handle) in tasks {
            let joined = match cancel {
                Some(cancel) if !cancelled => tokio::select! {
                    biased;
                    joined = &mut handle => Some(joined),
                    () = cancel.cancelled() => None,
                },
                _ if cancelled && !handle.is_finished() => None,
                _ => Some((&mut handle).await),
            };

            let outcome = match joined {
                Some(joined) => Self::outcome(&session, joined),
                None => {
                    cancelled = true;
                    handle.abort();
                    TargetOutcome::failure(BatchFailure::new(
                        ErrorKind::Cancelled,
                        "broadcast cancelled",
                    ))
                }
            };
            result.record(session.id(), outcome);
        }

        let failures = result.failure_count();
        self.pool.metrics().record_broadcast(failures);
        if failures > 0 {
            warn!(targets = result.len(), failures, "Broadcast finished with failures");
        } else {
            debug!(targets = result.len(), "Broadcast finished");
        }
        Ok(result)
    }

    fn outcome<T>(
        session: &Session,
        joined: Result<Result<T, TransportError>, JoinError>,
    ) -> TargetOutcome<T> {
        match joined {
            Ok(Ok(value)) => {
                session.touch();
                TargetOutcome::success(value)
            }
            Ok(Err(e)) => {
                let kind = session.transport().classify(&e);
                TargetOutcome::failure(BatchFailure::new(kind, e.message()))
            }
            Err(e) if e.is_panic() => {
                warn!(session = %session.id(), "Broadcast operation panicked");
                TargetOutcome::failure(BatchFailure::new(
                    ErrorKind::RecoverableTransport,
                    "operation panicked",
                ))
            }
            Err(_) => TargetOutcome::failure(BatchFailure::new(
                ErrorKind::Cancelled,
                "operation aborted",
            )),
        }
    }
}
