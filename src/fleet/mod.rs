// ABOUTME: Session fleet module managing many long-lived remote connections as one unit
//
// Owns a bounded set of sessions, connects them under a concurrency limit,
// retries failures with backoff, broadcasts operations to subsets and reports
// aggregated health. Transports are pluggable; the fleet never looks at payload.
//
// Key components:
// - session: per-connection state machine with serialized operations
// - pool: session ownership, capacity, bounded-concurrency connect/disconnect
// - batch: fan-out operations with per-target outcome isolation
// - retry: backoff strategies and their config form
// - observer: notification fan-out and the provided observers
// - health: snapshots and the background liveness/cleanup monitor
// - batcher: micro-batching queue with a single consumer
// - resource_pool: reusable object pool
// - artifact_cache: LRU cache of per-session artifacts
// - tcp: reference transport over plain TCP

pub mod artifact_cache;
pub mod batch;
pub mod batcher;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod observer;
pub mod pool;
pub mod resource_pool;
pub mod retry;
pub mod session;
pub mod target;
pub mod tcp;
pub mod transport;

// Re-exports for convenient access
pub use artifact_cache::{ArtifactCache, ArtifactCacheStats, ArtifactKey};
pub use batch::{BatchFailure, BatchOperator, BatchResult, SessionContext, TargetOutcome};
pub use batcher::{BatcherConfig, BatcherStats, MicroBatcher};
pub use config::{ArtifactCacheConfig, HealthConfig, PoolConfig};
pub use error::{ErrorKind, FleetError, FleetResult};
pub use health::{HealthMonitor, HealthSnapshot, HealthStatus};
pub use metrics::{FleetMetrics, MetricsSnapshot};
pub use observer::{
    ChannelObserver, EventLogObserver, FleetEvent, LoggingObserver, ObserverRegistry,
    OperationFailure, SessionObserver, StatsObserver,
};
pub use pool::SessionPool;
pub use resource_pool::{Pooled, ResourcePool, ResourcePoolStats};
pub use retry::{ExponentialBackoff, FixedDelay, NoRetry, RetryConfig, RetryPolicy};
pub use session::{Session, SessionFailure, SessionId, SessionInfo, SessionState, SessionStats};
pub use target::TargetDescriptor;
pub use tcp::TcpTransport;
pub use transport::{Transport, TransportError, TransportFactory};
