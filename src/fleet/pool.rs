// ABOUTME: Session pool owning the fleet's sessions and their connect/disconnect orchestration
// ABOUTME: Enforces capacity, bounds connect concurrency with a semaphore, reaps inactive sessions

//! Session pool.
//!
//! The `SessionPool` owns every [`Session`] of a fleet and is the only
//! component that drives their state machines:
//! - Create and remove sessions under a hard capacity limit
//! - Connect many sessions concurrently, at most `k` in flight
//! - Best-effort disconnect of the whole fleet
//! - Reap sessions that stayed `Error`/`Disconnected` past a grace period
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SessionPool                          │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │ sessions: RwLock<HashMap<SessionId, Arc<Session>>>    │  │
//! │  │    1 -> Session (connected)                           │  │
//! │  │    2 -> Session (retrying)                            │  │
//! │  │    3 -> Session (error)                               │  │
//! │  └───────────────────────────────────────────────────────┘  │
//! │                                                             │
//! │  ┌──────────────┐ ┌──────────────┐ ┌────────────────────┐   │
//! │  │ RetryPolicy  │ │ FleetMetrics │ │ ObserverRegistry   │   │
//! │  │  (shared)    │ │ (counters)   │ │ (notifications)    │   │
//! │  └──────────────┘ └──────────────┘ └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session map lock is only held to clone `Arc<Session>` handles out;
//! no await happens under it.
//!
//! # Usage
//!
//! ```ignore
//! let pool = SessionPool::new(PoolConfig::default(), policy, factory)?;
//! for target in targets {
//!     pool.create_session(target)?;
//! }
//! let connected = pool.connect_all(4).await?;
//! pool.dispose().await;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::config::PoolConfig;
use super::error::{FleetError, FleetResult};
use super::metrics::FleetMetrics;
use super::observer::{ObserverRegistry, SessionObserver};
use super::retry::{RetryConfig, RetryPolicy};
use super::session::{ConnectContext, Session, SessionId, SessionInfo, SessionState};
use super::target::TargetDescriptor;
use super::transport::TransportFactory;

/// Owner of a fleet of sessions
pub struct SessionPool {
    config: PoolConfig,
    policy: Arc<dyn RetryPolicy>,
    factory: Arc<dyn TransportFactory>,
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    observers: Arc<ObserverRegistry>,
    metrics: Arc<FleetMetrics>,
    /// Parent of every session token; cancelled on dispose
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("sessions", &self.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl SessionPool {
    pub fn new<F>(config: PoolConfig, policy: Arc<dyn RetryPolicy>, factory: F) -> FleetResult<Self>
    where
        F: TransportFactory + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            policy,
            factory: Arc::new(factory),
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            observers: Arc::new(ObserverRegistry::new()),
            metrics: Arc::new(FleetMetrics::new()),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        })
    }

    /// Build a pool from its configuration sections
    pub fn from_config<F>(config: &PoolConfig, retry: &RetryConfig, factory: F) -> FleetResult<Self>
    where
        F: TransportFactory + 'static,
    {
        Self::new(config.clone(), retry.build()?, factory)
    }

    /// Share an existing observer registry instead of the pool's own
    #[must_use]
    pub fn with_observers(mut self, observers: Arc<ObserverRegistry>) -> Self {
        self.observers = observers;
        self
    }

    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<FleetMetrics> {
        &self.metrics
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn attach(&self, observer: Arc<dyn SessionObserver>) -> bool {
        self.observers.attach(observer)
    }

    pub fn detach(&self, observer: &Arc<dyn SessionObserver>) -> bool {
        self.observers.detach(observer)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Resolves once the pool has been disposed
    pub async fn until_disposed(&self) {
        self.cancel.cancelled().await;
    }

    fn ensure_active(&self) -> FleetResult<()> {
        if self.is_disposed() {
            Err(FleetError::PoolDisposed)
        } else {
            Ok(())
        }
    }

    // === Session Management ===

    /// Register a new idle session for `target`
    pub fn create_session(&self, target: TargetDescriptor) -> FleetResult<SessionId> {
        self.ensure_active()?;
        target.validate()?;
        let transport = self.factory.create(&target)?;

        let id = {
            let mut sessions = self.sessions.write();
            if sessions.len() >= self.config.max_capacity {
                return Err(FleetError::CapacityExceeded {
                    max: self.config.max_capacity,
                });
            }
            let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
            let session = Session::new(id, target, transport, self.cancel.child_token());
            debug!(session = %id, endpoint = %session.target(), "Session created");
            sessions.insert(id, Arc::new(session));
            id
        };

        self.metrics.record_session_created();
        Ok(id)
    }

    /// Disconnect, dispose and forget a session; false for an unknown id
    pub async fn remove_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().remove(&id);
        let Some(session) = removed else {
            return false;
        };

        session.dispose(&self.observers).await;
        self.metrics.record_session_removed();
        info!(session = %id, endpoint = %session.target(), "Session removed");
        true
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Live session ids in ascending order
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state() == SessionState::Connected)
            .count()
    }

    /// Snapshots of sessions whose target matches `predicate`
    pub fn get_by_target<P>(&self, predicate: P) -> Vec<SessionInfo>
    where
        P: Fn(&TargetDescriptor) -> bool,
    {
        let mut infos: Vec<SessionInfo> = self
            .sessions
            .read()
            .values()
            .filter(|s| predicate(s.target()))
            .map(|s| s.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Snapshots of every session
    pub fn infos(&self) -> Vec<SessionInfo> {
        self.get_by_target(|_| true)
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.id());
        sessions
    }

    /// Reset id assignment to follow the highest live id
    ///
    /// Ids of removed sessions become reusable. Returns the next id that will
    /// be assigned.
    pub fn compact(&self) -> SessionId {
        let sessions = self.sessions.read();
        let next = sessions.keys().map(|id| id.0).max().map_or(1, |max| max + 1);
        self.next_id.store(next, Ordering::SeqCst);
        debug!(next_id = next, "Session ids compacted");
        SessionId(next)
    }

    // === Connect / Disconnect ===

    /// Connect every session, at most `max_concurrency` at once (0 = unlimited)
    ///
    /// Returns the number of sessions that ended connected.
    pub async fn connect_all(&self, max_concurrency: usize) -> FleetResult<usize> {
        let cancel = self.cancel.child_token();
        self.connect_all_with(max_concurrency, &cancel).await
    }

    /// Cancellable [`connect_all`](Self::connect_all)
    ///
    /// Sessions that have not started when `cancel` fires are left untouched;
    /// sessions mid-connect end in `Error`.
    pub async fn connect_all_with(
        &self,
        max_concurrency: usize,
        cancel: &CancellationToken,
    ) -> FleetResult<usize> {
        self.ensure_active()?;
        let sessions = self.sessions();
        Ok(self.connect_sessions(sessions, max_concurrency, cancel).await)
    }

    /// Connect the named sessions using the configured concurrency
    ///
    /// Unknown ids are skipped and repeated ids count once.
    pub async fn connect_subset(&self, ids: &[SessionId]) -> FleetResult<usize> {
        self.ensure_active()?;
        let sessions: Vec<Arc<Session>> = {
            let map = self.sessions.read();
            let mut seen = HashSet::new();
            ids.iter()
                .filter(|id| seen.insert(**id))
                .filter_map(|id| map.get(id).cloned())
                .collect()
        };
        let cancel = self.cancel.child_token();
        Ok(self
            .connect_sessions(sessions, self.config.max_concurrency, &cancel)
            .await)
    }

    async fn connect_sessions(
        &self,
        sessions: Vec<Arc<Session>>,
        max_concurrency: usize,
        cancel: &CancellationToken,
    ) -> usize {
        if sessions.is_empty() {
            return 0;
        }

        let limiter = (max_concurrency > 0).then(|| Arc::new(Semaphore::new(max_concurrency)));
        let total = sessions.len();
        info!(sessions = total, max_concurrency, "Connecting sessions");

        let handles: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                let limiter = limiter.clone();
                let cancel = cancel.clone();
                let policy = Arc::clone(&self.policy);
                let observers = Arc::clone(&self.observers);
                let metrics = Arc::clone(&self.metrics);
                let timeout = self.config.connect_timeout;

                tokio::spawn(async move {
                    // Held until the connect settles, released on every exit path
                    let _permit = match limiter {
                        Some(limiter) => tokio::select! {
                            biased;
                            () = cancel.cancelled() => return false,
                            permit = limiter.acquire_owned() => match permit {
                                Ok(permit) => Some(permit),
                                Err(_) => return false,
                            },
                        },
                        None => None,
                    };

                    let ctx = ConnectContext {
                        policy: &*policy,
                        timeout,
                        cancel: &cancel,
                        observers: &observers,
                        metrics: &metrics,
                    };
                    session.connect(&ctx).await
                })
            })
            .collect();

        let mut connected = 0;
        for result in join_all(handles).await {
            match result {
                Ok(true) => connected += 1,
                Ok(false) => {}
                Err(e) => error!(error = %e, "Connect task failed"),
            }
        }

        info!(connected, sessions = total, "Connect finished");
        connected
    }

    /// Disconnect every connected session; one failure never stops the rest
    pub async fn disconnect_all(&self) -> FleetResult<usize> {
        self.ensure_active()?;
        let sessions = self.sessions();
        let results = join_all(sessions.iter().map(|s| s.disconnect(&self.observers))).await;
        let disconnected = results.into_iter().filter(|done| *done).count();
        info!(disconnected, "Disconnected sessions");
        Ok(disconnected)
    }

    // === Maintenance ===

    /// Mark connected sessions with a dead transport as `Disconnected`
    ///
    /// Returns how many were found dead.
    pub fn check_liveness(&self) -> usize {
        self.sessions()
            .iter()
            .filter(|s| s.check_liveness(&self.observers))
            .count()
    }

    /// Remove sessions that have been `Error`/`Disconnected` for longer than `grace`
    ///
    /// Candidates are re-checked under their op lock before disposal.
    pub async fn cleanup_inactive(&self, grace: Duration) -> FleetResult<usize> {
        self.ensure_active()?;
        let stale: Vec<Arc<Session>> = self
            .sessions()
            .into_iter()
            .filter(|s| s.state().is_inactive() && s.time_in_state() > grace)
            .collect();

        let mut removed = 0;
        for session in stale {
            if !session.dispose_if_inactive(grace, &self.observers).await {
                debug!(session = %session.id(), "Session became active, kept");
                continue;
            }
            let taken = {
                let mut sessions = self.sessions.write();
                match sessions.get(&session.id()) {
                    Some(current) if Arc::ptr_eq(current, &session) => {
                        sessions.remove(&session.id())
                    }
                    _ => None,
                }
            };
            if taken.is_some() {
                self.metrics.record_session_removed();
                info!(session = %session.id(), endpoint = %session.target(), "Session removed");
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, grace_secs = grace.as_secs(), "Removed inactive sessions");
        }
        Ok(removed)
    }

    /// Cancel everything in flight, dispose every session and refuse further work
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let sessions: Vec<Arc<Session>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        join_all(sessions.iter().map(|s| s.dispose(&self.observers))).await;
        for _ in 0..count {
            self.metrics.record_session_removed();
        }

        info!(sessions = count, "Session pool disposed");
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
