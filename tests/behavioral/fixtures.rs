// ABOUTME: Shared test fixtures for behavioral tests
//
// Provides:
// - ScriptedTransport: transport whose behavior is picked by the target host prefix
// - ConnectProbe: shared counter of connects in flight and their peak
// - fleet(): pool builder wired to scripted transports

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use session_fleet::fleet::{
    FleetResult, PoolConfig, RetryPolicy, SessionPool, TargetDescriptor, Transport,
    TransportError,
};

/// Simulated connect latency
pub const CONNECT_DELAY: Duration = Duration::from_millis(50);

/// Tracks how many connects run at once
#[derive(Debug, Default)]
pub struct ConnectProbe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl ConnectProbe {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Behavior by host prefix:
/// - `down-*`: every connect fails with a recoverable error
/// - `denied-*`: every connect fails with an auth error
/// - `flaky-*`: the first connect fails, later ones succeed
/// - `rigid-*`: connects fine but rejects reconfigure
/// - anything else: connects after `CONNECT_DELAY`
#[derive(Debug)]
pub struct ScriptedTransport {
    host: String,
    probe: Arc<ConnectProbe>,
    connected: AtomicBool,
    attempts: AtomicU32,
    reconfigured: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(host: &str, probe: Arc<ConnectProbe>) -> Self {
        Self {
            host: host.to_string(),
            probe,
            connected: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            reconfigured: AtomicU32::new(0),
        }
    }

    /// Simulate the remote side closing the connection
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _target: &TargetDescriptor,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.enter();
        tokio::time::sleep(CONNECT_DELAY).await;
        self.probe.exit();

        if self.host.starts_with("down-") {
            return Err(TransportError::recoverable(format!("{} unreachable", self.host)));
        }
        if self.host.starts_with("denied-") {
            return Err(TransportError::auth(format!("{} rejected credentials", self.host)));
        }
        if self.host.starts_with("flaky-") && attempt == 1 {
            return Err(TransportError::recoverable("connection reset"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "host": self.host,
            "attempts": self.attempts.load(Ordering::SeqCst),
            "reconfigured": self.reconfigured.load(Ordering::SeqCst),
        })
    }

    async fn reconfigure(&self, _config: &serde_json::Value) -> Result<(), TransportError> {
        if self.host.starts_with("rigid-") {
            return Err(TransportError::unsupported("reconfigure"));
        }
        self.reconfigured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted transports handed out by a pool, kept for later inspection
#[derive(Debug, Default)]
pub struct Transports {
    pub probe: Arc<ConnectProbe>,
    created: parking_lot::Mutex<Vec<(String, Arc<ScriptedTransport>)>>,
}

impl Transports {
    /// The transport created for `host`
    pub fn get(&self, host: &str) -> Option<Arc<ScriptedTransport>> {
        self.created
            .lock()
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, t)| Arc::clone(t))
    }
}

/// A pool whose sessions use scripted transports
pub fn fleet(
    config: PoolConfig,
    policy: Arc<dyn RetryPolicy>,
) -> FleetResult<(SessionPool, Arc<Transports>)> {
    let transports = Arc::new(Transports::default());
    let registry = Arc::clone(&transports);
    let pool = SessionPool::new(
        config,
        policy,
        move |target: &TargetDescriptor| -> FleetResult<Arc<dyn Transport>> {
            let transport = Arc::new(ScriptedTransport::new(
                target.host(),
                Arc::clone(&registry.probe),
            ));
            registry
                .created
                .lock()
                .push((target.host().to_string(), Arc::clone(&transport)));
            Ok(transport)
        },
    )?;
    Ok((pool, transports))
}

/// Pool config with the given capacity and concurrency and a generous connect timeout
pub fn pool_config(max_capacity: usize, max_concurrency: usize) -> PoolConfig {
    PoolConfig {
        max_capacity,
        max_concurrency,
        connect_timeout: Duration::from_secs(5),
    }
}
