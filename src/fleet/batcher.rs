// ABOUTME: Micro-batching queue coalescing items by size or timeout
//
// Producers push into a bounded channel (await for backpressure, or try and
// fail fast). One consumer task per batcher collects up to `batch_size` items,
// or whatever arrived within `batch_timeout` of the first item, and hands the
// batch to the processor. Processor errors and panics are logged and reported;
// the loop keeps going.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::error::{ErrorKind, FleetError, FleetResult};
use super::observer::{ObserverRegistry, OperationFailure};

/// Batching parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Maximum items per batch
    pub batch_size: usize,

    /// Maximum wait after the first item of a batch
    #[serde(with = "crate::config::duration_millis", rename = "batch_timeout_ms")]
    pub batch_timeout: Duration,

    /// Bounded queue capacity in front of the consumer
    pub capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            batch_timeout: Duration::from_millis(100),
            capacity: 1024,
        }
    }
}

impl BatcherConfig {
    pub fn validate(&self) -> FleetResult<()> {
        if self.batch_size == 0 {
            return Err(FleetError::InvalidConfiguration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.capacity == 0 {
            return Err(FleetError::InvalidConfiguration(
                "batcher capacity must be at least 1".to_string(),
            ));
        }
        if self.batch_timeout.is_zero() {
            return Err(FleetError::InvalidConfiguration(
                "batch_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    items: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time batcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatcherStats {
    pub batches: u64,
    pub items: u64,
    pub failures: u64,
}

/// Bounded queue with a single batching consumer
pub struct MicroBatcher<T> {
    tx: RwLock<Option<mpsc::Sender<T>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    capacity: usize,
    counters: Arc<Counters>,
}

impl<T> std::fmt::Debug for MicroBatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroBatcher")
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> MicroBatcher<T> {
    /// Start a batcher; must be called inside a tokio runtime
    pub fn new<F, Fut>(config: BatcherConfig, processor: F) -> FleetResult<Self>
    where
        F: FnMut(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::with_observers(config, None, processor)
    }

    /// Start a batcher that reports processor failures to `observers`
    pub fn with_observers<F, Fut>(
        config: BatcherConfig,
        observers: Option<Arc<ObserverRegistry>>,
        processor: F,
    ) -> FleetResult<Self>
    where
        F: FnMut(Vec<T>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.capacity);
        let cancel = CancellationToken::new();
        let counters = Arc::new(Counters::default());
        let capacity = config.capacity;

        let handle = tokio::spawn(consume(
            rx,
            processor,
            config,
            cancel.clone(),
            observers,
            Arc::clone(&counters),
        ));

        Ok(Self {
            tx: RwLock::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            cancel,
            capacity,
            counters,
        })
    }

    /// Queue an item, waiting while the queue is full
    pub async fn enqueue(&self, item: T) -> FleetResult<()> {
        let tx = self.tx.read().clone().ok_or(FleetError::BatcherClosed)?;
        tx.send(item).await.map_err(|_| FleetError::BatcherClosed)
    }

    /// Queue an item without waiting
    pub fn try_enqueue(&self, item: T) -> FleetResult<()> {
        let guard = self.tx.read();
        let tx = guard.as_ref().ok_or(FleetError::BatcherClosed)?;
        tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FleetError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => FleetError::BatcherClosed,
        })
    }

    /// Stop accepting input, flush what is queued and wait for the consumer
    pub async fn complete(&self) {
        self.tx.write().take();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Batch consumer panicked");
                }
            }
        }
    }

    /// Like [`complete`](Self::complete) but bounded by `drain_timeout`
    ///
    /// Returns true when the drain finished in time; otherwise the consumer is
    /// cancelled and aborted and queued items are dropped.
    pub async fn shutdown(&self, drain_timeout: Duration) -> bool {
        self.tx.write().take();
        let Some(mut handle) = self.handle.lock().await.take() else {
            return true;
        };

        if tokio::time::timeout(drain_timeout, &mut handle).await.is_ok() {
            return true;
        }

        warn!(
            timeout_ms = %drain_timeout.as_millis(),
            "Batch drain timed out, forcing shutdown"
        );
        self.cancel.cancel();
        handle.abort();
        false
    }

    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            batches: self.counters.batches.load(Ordering::Relaxed),
            items: self.counters.items.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl<T> MicroBatcher<T> {
    // Separate impl so Drop and Debug do not need the `Send + 'static` bound
    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    fn abort_consumer(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

impl<T> Drop for MicroBatcher<T> {
    fn drop(&mut self) {
        self.abort_consumer();
    }
}

async fn consume<T, F, Fut>(
    mut rx: mpsc::Receiver<T>,
    mut processor: F,
    config: BatcherConfig,
    cancel: CancellationToken,
    observers: Option<Arc<ObserverRegistry>>,
    counters: Arc<Counters>,
) where
    F: FnMut(Vec<T>) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    loop {
        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let mut batch = Vec::with_capacity(config.batch_size);
        batch.push(first);
        let deadline = Instant::now() + config.batch_timeout;
        let mut input_closed = false;

        while batch.len() < config.batch_size {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                next = tokio::time::timeout_at(deadline, rx.recv()) => match next {
                    Ok(Some(item)) => batch.push(item),
                    Ok(None) => {
                        input_closed = true;
                        break;
                    }
                    Err(_) => break,
                },
            }
        }

        let size = batch.len();
        let outcome = match catch_unwind(AssertUnwindSafe(|| processor(batch))) {
            Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("batch processor panicked")),
            },
            Err(_) => Err(anyhow::anyhow!("batch processor panicked")),
        };

        counters.batches.fetch_add(1, Ordering::Relaxed);
        counters.items.fetch_add(size as u64, Ordering::Relaxed);

        match outcome {
            Ok(()) => debug!(size, "Processed batch"),
            Err(e) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(size, error = %e, "Batch processor failed");
                if let Some(observers) = &observers {
                    observers.notify_operation_failed(&OperationFailure {
                        session_id: None,
                        operation: "batch_processor".to_string(),
                        kind: ErrorKind::RecoverableTransport,
                        message: e.to_string(),
                    });
                }
            }
        }

        if input_closed {
            break;
        }
    }

    debug!("Batch consumer exited");
}
