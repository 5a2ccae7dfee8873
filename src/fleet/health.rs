// ABOUTME: Fleet health aggregation and the background liveness/cleanup monitor
// ABOUTME: Snapshots count sessions by state; the monitor detects dead transports and reaps inactive sessions

//! Health monitoring for the session fleet.
//!
//! The `HealthMonitor` runs as a background task that:
//! - Checks transport liveness of connected sessions at a fixed interval
//! - Reaps sessions inactive past the grace period every N cycles
//! - Publishes a [`HealthSnapshot`] to the pool's observers after each check
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 HealthMonitor                  │
//! │                                                │
//! │  ┌──────────────┐    ┌──────────────────────┐  │
//! │  │ Check Loop   │───▶│ SessionPool::        │  │
//! │  │ (interval)   │    │   check_liveness     │  │
//! │  └──────────────┘    └──────────────────────┘  │
//! │          │                                     │
//! │          ├──────────▶ cleanup_inactive (every  │
//! │          │            N cycles)                │
//! │          ▼                                     │
//! │  ┌──────────────┐                              │
//! │  │ notify_health│                              │
//! │  └──────────────┘                              │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut monitor = HealthMonitor::from_config(&HealthConfig::default());
//! monitor.start(Arc::clone(&pool));
//! // ...
//! monitor.stop().await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::HealthConfig;
use super::pool::SessionPool;
use super::session::{SessionId, SessionInfo, SessionState};

// === Health Status ===

/// Overall condition of the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every session is connected or on its way there
    Healthy,

    /// Some sessions dropped and may reconnect
    Degraded { disconnected: Vec<SessionId> },

    /// Some sessions failed
    Critical { failed: Vec<SessionId> },
}

impl HealthStatus {
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }

    /// Derive the status from session snapshots
    #[must_use]
    pub fn from_sessions(sessions: &[SessionInfo]) -> Self {
        let ids_in = |state: SessionState| -> Vec<SessionId> {
            sessions
                .iter()
                .filter(|s| s.state == state)
                .map(|s| s.id)
                .collect()
        };

        let failed = ids_in(SessionState::Error);
        if !failed.is_empty() {
            return Self::Critical { failed };
        }
        let disconnected = ids_in(SessionState::Disconnected);
        if !disconnected.is_empty() {
            return Self::Degraded { disconnected };
        }
        Self::Healthy
    }
}

// === Health Snapshot ===

/// Aggregate view of the fleet at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub total_sessions: usize,
    pub connected: usize,
    pub by_state: BTreeMap<SessionState, usize>,
    /// Mean connected duration over currently connected sessions
    #[serde(with = "crate::config::duration_millis", rename = "average_connected_ms")]
    pub average_connected: Duration,
    pub total_retries: u64,
    pub total_connect_attempts: u64,
    pub status: HealthStatus,
    pub taken_at: DateTime<Utc>,
}

impl HealthSnapshot {
    #[must_use]
    pub fn from_sessions(sessions: &[SessionInfo]) -> Self {
        let mut by_state = BTreeMap::new();
        let mut connected_total = Duration::ZERO;
        let mut connected = 0usize;
        let mut total_retries = 0;
        let mut total_connect_attempts = 0;

        for session in sessions {
            *by_state.entry(session.state).or_insert(0) += 1;
            total_retries += session.stats.total_retries;
            total_connect_attempts += session.stats.connect_attempts;
            if session.state == SessionState::Connected {
                connected += 1;
                connected_total += session.connected_for.unwrap_or_default();
            }
        }

        let average_connected = u32::try_from(connected)
            .ok()
            .filter(|n| *n > 0)
            .map_or(Duration::ZERO, |n| connected_total / n);

        Self {
            total_sessions: sessions.len(),
            connected,
            by_state,
            average_connected,
            total_retries,
            total_connect_attempts,
            status: HealthStatus::from_sessions(sessions),
            taken_at: Utc::now(),
        }
    }

    /// Snapshot of every session in `pool`
    #[must_use]
    pub fn capture(pool: &SessionPool) -> Self {
        Self::from_sessions(&pool.infos())
    }

    /// Number of sessions in `state`
    #[must_use]
    pub fn count(&self, state: SessionState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

// === Health Monitor ===

/// Background liveness checker for a [`SessionPool`]
pub struct HealthMonitor {
    interval: Duration,
    cleanup_grace: Option<Duration>,
    /// Check cycles between cleanup runs
    cleanup_interval_cycles: u32,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Monitor that only checks liveness; see [`with_cleanup`](Self::with_cleanup)
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cleanup_grace: None,
            cleanup_interval_cycles: 6,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &HealthConfig) -> Self {
        let monitor = Self::new(config.interval);
        match config.cleanup_grace {
            Some(grace) => monitor.with_cleanup(grace, config.cleanup_interval_cycles),
            None => monitor,
        }
    }

    /// Remove sessions inactive for longer than `grace`, every `cycles` checks
    #[must_use]
    pub fn with_cleanup(mut self, grace: Duration, cycles: u32) -> Self {
        self.cleanup_grace = Some(grace);
        self.cleanup_interval_cycles = cycles.max(1);
        self
    }

    /// Spawn the monitoring loop; a running loop is stopped first
    pub fn start(&mut self, pool: Arc<SessionPool>) {
        if let Some(handle) = self.handle.take() {
            self.cancel.cancel();
            handle.abort();
        }
        self.cancel = CancellationToken::new();

        let cancel = self.cancel.clone();
        let interval = self.interval;
        let cleanup = self.cleanup_grace.map(|grace| (grace, self.cleanup_interval_cycles));

        self.handle = Some(tokio::spawn(async move {
            Self::health_check_loop(pool, interval, cleanup, cancel).await;
        }));
        info!(interval_ms = %self.interval.as_millis(), "Health monitor started");
    }

    /// Signal the loop to stop and wait for it
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
                warn!("Health monitor did not stop in time");
            }
        }
        info!("Health monitor stopped");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished()) && !self.cancel.is_cancelled()
    }

    /// Run one liveness check and publish the resulting snapshot
    pub fn check_once(pool: &SessionPool) -> HealthSnapshot {
        let dead = pool.check_liveness();
        if dead > 0 {
            warn!(dead, "Sessions lost their transport");
        }

        let snapshot = HealthSnapshot::capture(pool);
        match &snapshot.status {
            HealthStatus::Healthy => {
                debug!(sessions = snapshot.total_sessions, "All sessions healthy");
            }
            HealthStatus::Degraded { disconnected } => {
                warn!(
                    disconnected_count = disconnected.len(),
                    disconnected = ?disconnected,
                    "Some sessions disconnected"
                );
            }
            HealthStatus::Critical { failed } => {
                error!(failed_count = failed.len(), failed = ?failed, "Sessions in error state");
            }
        }
        pool.observers().notify_health(&snapshot);
        snapshot
    }

    async fn health_check_loop(
        pool: Arc<SessionPool>,
        interval: Duration,
        cleanup: Option<(Duration, u32)>,
        cancel: CancellationToken,
    ) {
        let mut cycle_count: u32 = 0;
        debug!("Health check loop started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = pool.until_disposed() => break,
                () = tokio::time::sleep(interval) => {}
            }

            Self::check_once(&pool);

            cycle_count = cycle_count.wrapping_add(1);
            if let Some((grace, cycles)) = cleanup {
                if cycle_count % cycles == 0 {
                    match pool.cleanup_inactive(grace).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Reaped inactive sessions"),
                        Err(e) => {
                            debug!(error = %e, "Cleanup skipped");
                            break;
                        }
                    }
                }
            }
        }

        debug!("Health check loop exited");
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
