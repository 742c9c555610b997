//! Event batcher: releases accumulated events by size or by time
//!
//! Events are collected into a single buffer behind one lock. A batch is cut
//! when either:
//! - the buffer reaches `max_batch_size` (flushed inline on the adding thread), or
//! - `flush_timeout` has passed since the last flush while events are pending
//!   (flushed by a background timer task).
//!
//! Cutting a batch swaps the buffer out under the lock, and batches are
//! handed to the sink one at a time, so concurrent triggers neither lose nor
//! duplicate events and batches reach the sink in the order they were cut.
//!
//! # Example
//!
//! ```
//! use tether_core_queue::{BatchRejected, BatcherConfig, EventBatcher, QueuedEvent};
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = {
//!     let seen = Arc::clone(&seen);
//!     move |batch: Vec<QueuedEvent>| -> Result<(), BatchRejected> {
//!         seen.lock().unwrap().push(batch.len());
//!         Ok(())
//!     }
//! };
//!
//! let batcher = EventBatcher::start(
//!     BatcherConfig { max_batch_size: 2, flush_timeout: Duration::from_secs(1) },
//!     Arc::new(sink),
//! )
//! .unwrap();
//!
//! batcher.add("a").unwrap();
//! batcher.add("b").unwrap(); // size trigger
//! assert_eq!(*seen.lock().unwrap(), vec![2]);
//!
//! batcher.shutdown();
//! # }
//! ```

use crate::error::{BatchRejected, BatcherError};
use crate::event::QueuedEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Receives cut batches
///
/// Called synchronously on whichever thread cut the batch, so it must not
/// block on I/O.
pub trait BatchSink: Send + Sync {
    fn send_batch(&self, batch: Vec<QueuedEvent>) -> Result<(), BatchRejected>;
}

impl<F> BatchSink for F
where
    F: Fn(Vec<QueuedEvent>) -> Result<(), BatchRejected> + Send + Sync,
{
    fn send_batch(&self, batch: Vec<QueuedEvent>) -> Result<(), BatchRejected> {
        self(batch)
    }
}

/// Configuration for batching behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Number of events that triggers an immediate flush
    pub max_batch_size: usize,
    /// Maximum time pending events wait after the previous flush
    pub flush_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            flush_timeout: Duration::from_millis(1000),
        }
    }
}

/// Why a batch was cut
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Size,
    Timer,
    Manual,
    Shutdown,
}

/// Statistics for the batcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherMetrics {
    /// Events waiting for the next flush
    pub pending: usize,
    /// Batches handed to the sink
    pub batches_flushed: u64,
    /// Events handed to the sink
    pub events_flushed: u64,
    /// Batches the sink rejected
    pub failed_flushes: u64,
    /// Flushes cut by the size trigger
    pub size_flushes: u64,
    /// Flushes cut by the timer
    pub timer_flushes: u64,
}

#[derive(Debug)]
struct BatchBuffer {
    events: Vec<QueuedEvent>,
    last_flush: Instant,
    shut_down: bool,
}

struct BatcherInner {
    config: BatcherConfig,
    sink: Arc<dyn BatchSink>,
    buffer: Mutex<BatchBuffer>,
    /// Held while a batch is cut and delivered; keeps batches in order
    dispatch: Mutex<()>,
    pending: Notify,
    batches_flushed: AtomicU64,
    events_flushed: AtomicU64,
    failed_flushes: AtomicU64,
    size_flushes: AtomicU64,
    timer_flushes: AtomicU64,
}

impl BatcherInner {
    fn buffer(&self) -> MutexGuard<'_, BatchBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cut and deliver one batch if the trigger's condition holds
    fn flush(&self, trigger: FlushTrigger) -> usize {
        let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);

        let batch = {
            let mut buffer = self.buffer();
            let due = match trigger {
                FlushTrigger::Size => buffer.events.len() >= self.config.max_batch_size,
                FlushTrigger::Timer => {
                    !buffer.events.is_empty()
                        && buffer.last_flush.elapsed() >= self.config.flush_timeout
                }
                FlushTrigger::Manual => !buffer.events.is_empty(),
                FlushTrigger::Shutdown => {
                    if buffer.shut_down {
                        return 0;
                    }
                    buffer.shut_down = true;
                    !buffer.events.is_empty()
                }
            };
            if !due {
                return 0;
            }

            buffer.last_flush = Instant::now();
            if trigger == FlushTrigger::Size {
                let n = self.config.max_batch_size;
                buffer.events.drain(..n).collect::<Vec<_>>()
            } else {
                std::mem::take(&mut buffer.events)
            }
        };

        self.deliver(batch, trigger)
    }

    fn deliver(&self, batch: Vec<QueuedEvent>, trigger: FlushTrigger) -> usize {
        let count = batch.len();
        match trigger {
            FlushTrigger::Size => self.size_flushes.fetch_add(1, Ordering::Relaxed),
            FlushTrigger::Timer => self.timer_flushes.fetch_add(1, Ordering::Relaxed),
            FlushTrigger::Manual | FlushTrigger::Shutdown => 0,
        };

        trace!(count, trigger = ?trigger, "Flushing batch");

        match self.sink.send_batch(batch) {
            Ok(()) => {
                self.batches_flushed.fetch_add(1, Ordering::Relaxed);
                self.events_flushed.fetch_add(count as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, count, trigger = ?trigger, "Batch sink rejected batch");
            }
        }

        count
    }
}

/// Accumulates events and releases them as batches
///
/// Dropping the batcher stops its timer task without flushing; call
/// [`EventBatcher::shutdown`] first to deliver pending events.
pub struct EventBatcher {
    inner: Arc<BatcherInner>,
    cancel: CancellationToken,
}

impl EventBatcher {
    /// Create a batcher and spawn its flush timer on the current tokio runtime
    pub fn start(config: BatcherConfig, sink: Arc<dyn BatchSink>) -> Result<Self, BatcherError> {
        if config.max_batch_size == 0 {
            return Err(BatcherError::InvalidConfig(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if config.flush_timeout.is_zero() {
            return Err(BatcherError::InvalidConfig(
                "flush_timeout must be non-zero".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BatcherError::NoRuntime)?;

        let inner = Arc::new(BatcherInner {
            buffer: Mutex::new(BatchBuffer {
                events: Vec::with_capacity(config.max_batch_size),
                last_flush: Instant::now(),
                shut_down: false,
            }),
            config,
            sink,
            dispatch: Mutex::new(()),
            pending: Notify::new(),
            batches_flushed: AtomicU64::new(0),
            events_flushed: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            size_flushes: AtomicU64::new(0),
            timer_flushes: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();

        runtime.spawn(run_timer(Arc::clone(&inner), cancel.clone()));

        debug!(
            max_batch_size = inner.config.max_batch_size,
            flush_timeout_ms = inner.config.flush_timeout.as_millis() as u64,
            "Event batcher started"
        );

        Ok(Self { inner, cancel })
    }

    /// Add an event to the pending batch
    ///
    /// Reaching `max_batch_size` flushes on the calling thread. After
    /// shutdown the payload is handed back in the error.
    pub fn add(&self, payload: impl Into<String>) -> Result<(), BatcherError> {
        let (was_empty, full) = {
            let mut buffer = self.inner.buffer();
            if buffer.shut_down {
                return Err(BatcherError::ShutDown(payload.into()));
            }
            let was_empty = buffer.events.is_empty();
            buffer.events.push(QueuedEvent::new(payload));
            (
                was_empty,
                buffer.events.len() >= self.inner.config.max_batch_size,
            )
        };

        if full {
            while self.inner.flush(FlushTrigger::Size) > 0 {}
        } else if was_empty {
            self.inner.pending.notify_one();
        }

        Ok(())
    }

    /// Flush whatever is pending right now
    pub fn flush(&self) -> usize {
        self.inner.flush(FlushTrigger::Manual)
    }

    /// Deliver any pending events once, then refuse further adds
    ///
    /// Returns the number of events in the final batch. Runs synchronously;
    /// calling it again is a no-op.
    pub fn shutdown(&self) -> usize {
        let flushed = self.inner.flush(FlushTrigger::Shutdown);
        self.cancel.cancel();
        if flushed > 0 {
            debug!(count = flushed, "Batcher flushed final batch on shutdown");
        }
        flushed
    }

    /// Check if `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.buffer().shut_down
    }

    /// Events waiting for the next flush
    pub fn pending(&self) -> usize {
        self.inner.buffer().events.len()
    }

    /// Get the configuration
    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Get statistics
    pub fn metrics(&self) -> BatcherMetrics {
        BatcherMetrics {
            pending: self.pending(),
            batches_flushed: self.inner.batches_flushed.load(Ordering::Relaxed),
            events_flushed: self.inner.events_flushed.load(Ordering::Relaxed),
            failed_flushes: self.inner.failed_flushes.load(Ordering::Relaxed),
            size_flushes: self.inner.size_flushes.load(Ordering::Relaxed),
            timer_flushes: self.inner.timer_flushes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for EventBatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for EventBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBatcher")
            .field("config", &self.inner.config)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Waits for pending events and flushes them once they are due
async fn run_timer(inner: Arc<BatcherInner>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.pending.notified() => {}
        }

        loop {
            let deadline = {
                let buffer = inner.buffer();
                if buffer.events.is_empty() || buffer.shut_down {
                    break;
                }
                buffer.last_flush + inner.config.flush_timeout
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
            }

            inner.flush(FlushTrigger::Timer);
        }
    }

    trace!("Batch timer stopped");
}
