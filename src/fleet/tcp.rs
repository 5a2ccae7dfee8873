// ABOUTME: TCP transport treating an open socket as the session
// ABOUTME: Used to probe fleets of endpoints; never reads or writes payload

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::error::{ErrorKind, FleetResult};
use super::target::TargetDescriptor;
use super::transport::{Transport, TransportError};

/// Map an I/O failure onto the fleet's error taxonomy
pub fn classify_io(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::PermissionDenied => ErrorKind::PermanentAuth,
        io::ErrorKind::InvalidInput | io::ErrorKind::AddrNotAvailable | io::ErrorKind::Unsupported => {
            ErrorKind::InvalidConfiguration
        }
        _ => ErrorKind::RecoverableTransport,
    }
}

fn io_error(context: &str, err: &io::Error) -> TransportError {
    TransportError::with_kind(classify_io(err.kind()), format!("{context}: {err}"))
}

struct Connection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
}

/// One TCP connection per session
#[derive(Default)]
pub struct TcpTransport {
    default_port: Option<u16>,
    connection: Mutex<Option<Connection>>,
    connects: AtomicU64,
    bytes_discarded: AtomicU64,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("default_port", &self.default_port)
            .field("connected", &self.connection.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// `default_port` is used for targets that carry no port
    pub fn new(default_port: Option<u16>) -> Self {
        Self {
            default_port,
            ..Self::default()
        }
    }

    /// Factory building one transport per session
    pub fn factory(
        default_port: Option<u16>,
    ) -> impl Fn(&TargetDescriptor) -> FleetResult<Arc<dyn Transport>> + Send + Sync + 'static {
        move |_target: &TargetDescriptor| -> FleetResult<Arc<dyn Transport>> {
            Ok(Arc::new(Self::new(default_port)))
        }
    }

    fn address(&self, target: &TargetDescriptor) -> Result<String, TransportError> {
        match target.port().or(self.default_port) {
            Some(port) => Ok(format!("{}:{}", target.host(), port)),
            None => Err(TransportError::with_kind(
                ErrorKind::InvalidConfiguration,
                format!("target {target} has no port"),
            )),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, target: &TargetDescriptor, timeout: Duration) -> Result<(), TransportError> {
        let address = self.address(target)?;
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(io_error(&format!("connect to {address}"), &e)),
            Err(_) => {
                return Err(TransportError::recoverable(format!(
                    "connect to {address} timed out"
                )))
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| io_error("set TCP_NODELAY", &e))?;

        let connection = Connection {
            peer: stream.peer_addr().ok(),
            local: stream.local_addr().ok(),
            stream,
        };
        debug!(%address, peer = ?connection.peer, "TCP connected");

        // A reconnect replaces any stale socket
        *self.connection.lock() = Some(connection);
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let taken = self.connection.lock().take();
        let Some(mut connection) = taken else {
            return Ok(());
        };
        match connection.stream.shutdown().await {
            Ok(()) => Ok(()),
            // Peer already gone; the socket is closed either way
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(io_error("shutdown", &e)),
        }
    }

    fn is_alive(&self) -> bool {
        let guard = self.connection.lock();
        let Some(connection) = guard.as_ref() else {
            return false;
        };

        let mut buf = [0u8; 512];
        match connection.stream.try_read(&mut buf) {
            Ok(0) => false,
            Ok(n) => {
                self.bytes_discarded.fetch_add(n as u64, Ordering::Relaxed);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let guard = self.connection.lock();
        serde_json::json!({
            "connected": guard.is_some(),
            "peer": guard.as_ref().and_then(|c| c.peer).map(|a| a.to_string()),
            "local": guard.as_ref().and_then(|c| c.local).map(|a| a.to_string()),
            "connects": self.connects.load(Ordering::Relaxed),
            "bytes_discarded": self.bytes_discarded.load(Ordering::Relaxed),
        })
    }
}
