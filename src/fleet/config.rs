// ABOUTME: Configuration for the session pool, health monitor and artifact cache
//
// Defines the tunable sections consumed by the fleet:
// - PoolConfig: capacity, default connect concurrency, per-attempt timeout
// - HealthConfig: liveness interval and inactive-session reaping
// - ArtifactCacheConfig: LRU capacity and recycled buffer count
//
// Retry and batching sections live next to their types (RetryConfig, BatcherConfig).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{FleetError, FleetResult};

/// Session pool limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of sessions the pool will hold
    pub max_capacity: usize,

    /// Default connect concurrency for `connect_subset` (0 = unlimited)
    pub max_concurrency: usize,

    /// Per-attempt connect timeout
    #[serde(with = "crate::config::duration_millis", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_capacity: 50,
            max_concurrency: 4,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> FleetResult<()> {
        if self.max_capacity == 0 {
            return Err(FleetError::InvalidConfiguration(
                "pool max_capacity must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(FleetError::InvalidConfiguration(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Background health monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between liveness checks
    #[serde(with = "crate::config::duration_secs", rename = "interval_secs")]
    pub interval: Duration,

    /// Remove sessions inactive for longer than this; 0 in TOML disables reaping
    #[serde(with = "crate::config::option_duration_secs", rename = "cleanup_grace_secs")]
    pub cleanup_grace: Option<Duration>,

    /// Number of check cycles between cleanup runs
    pub cleanup_interval_cycles: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            cleanup_grace: Some(Duration::from_secs(60)),
            cleanup_interval_cycles: 6,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> FleetResult<()> {
        if self.interval.is_zero() {
            return Err(FleetError::InvalidConfiguration(
                "health interval must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval_cycles == 0 {
            return Err(FleetError::InvalidConfiguration(
                "cleanup_interval_cycles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Artifact cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactCacheConfig {
    /// Maximum cached artifacts before LRU eviction
    pub capacity: usize,

    /// Maximum idle byte buffers kept for reuse
    pub buffer_pool_size: usize,

    /// Initial capacity of freshly built buffers
    pub buffer_capacity: usize,
}

impl Default for ArtifactCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            buffer_pool_size: 16,
            buffer_capacity: 64 * 1024,
        }
    }
}

impl ArtifactCacheConfig {
    pub fn validate(&self) -> FleetResult<()> {
        if self.capacity == 0 {
            return Err(FleetError::InvalidConfiguration(
                "artifact cache capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
