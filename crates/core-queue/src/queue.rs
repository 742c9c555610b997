//! Bounded event queue with drop-oldest overflow
//!
//! Events that cannot be delivered right now (no authenticated connection,
//! or a transmit failure) wait here. The queue never rejects a new event:
//! when it is full the oldest entry is evicted instead, so under sustained
//! overflow it always holds the most recent `max_size` events.
//!
//! # Example
//!
//! ```
//! use tether_core_queue::BoundedEventQueue;
//!
//! let queue = BoundedEventQueue::new(2).unwrap();
//!
//! queue.enqueue("build-1");
//! queue.enqueue("build-2");
//! queue.enqueue("build-3"); // evicts build-1
//!
//! let events = queue.dequeue_all();
//! assert_eq!(events[0].payload(), "build-2");
//! assert_eq!(events[1].payload(), "build-3");
//! assert_eq!(queue.metrics().total_dropped, 1);
//! ```

use crate::error::QueueError;
use crate::event::QueuedEvent;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Statistics for the event queue, read under a single lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Current number of queued events
    pub size: usize,
    /// Maximum capacity
    pub max_size: usize,
    /// Total events ever enqueued (re-queues excluded)
    pub total_enqueued: u64,
    /// Total events evicted by the drop-oldest policy
    pub total_dropped: u64,
    /// Total events removed by `dequeue_all`
    pub total_flushed: u64,
    /// Total events returned to the head after a failed delivery
    pub total_requeued: u64,
}

impl QueueMetrics {
    /// Fraction of capacity in use (0.0 - 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            return 0.0;
        }
        self.size as f64 / self.max_size as f64
    }
}

#[derive(Debug)]
struct QueueInner {
    events: VecDeque<QueuedEvent>,
    total_enqueued: u64,
    total_dropped: u64,
    total_flushed: u64,
    total_requeued: u64,
}

/// Fixed-capacity FIFO of serialized events
///
/// Safe for many concurrent producers and one flushing consumer. One mutex
/// guards the deque and the counters together, so every metrics snapshot is
/// internally consistent.
#[derive(Debug)]
pub struct BoundedEventQueue {
    max_size: usize,
    inner: Mutex<QueueInner>,
}

impl BoundedEventQueue {
    /// Create a new queue holding at most `max_size` events
    pub fn new(max_size: usize) -> Result<Self, QueueError> {
        if max_size == 0 {
            return Err(QueueError::InvalidCapacity(max_size));
        }

        Ok(Self {
            max_size,
            inner: Mutex::new(QueueInner {
                events: VecDeque::with_capacity(max_size.min(1024)),
                total_enqueued: 0,
                total_dropped: 0,
                total_flushed: 0,
                total_requeued: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event, evicting the oldest one if the queue is full
    ///
    /// Always returns `true`: a new event is never refused in favour of an
    /// old one.
    pub fn enqueue(&self, payload: impl Into<String>) -> bool {
        self.enqueue_event(QueuedEvent::new(payload))
    }

    /// Append an already-stamped event
    pub fn enqueue_event(&self, event: QueuedEvent) -> bool {
        let mut inner = self.lock();
        inner.total_enqueued += 1;

        if inner.events.len() >= self.max_size {
            inner.events.pop_front();
            inner.total_dropped += 1;
            if inner.total_dropped == 1 || inner.total_dropped % 1000 == 0 {
                warn!(
                    max_size = self.max_size,
                    total_dropped = inner.total_dropped,
                    "Event queue full, dropping oldest event"
                );
            }
        }

        inner.events.push_back(event);
        true
    }

    /// Remove and return every queued event in insertion order
    pub fn dequeue_all(&self) -> Vec<QueuedEvent> {
        let mut inner = self.lock();
        if inner.events.is_empty() {
            return Vec::new();
        }

        let events: Vec<QueuedEvent> = inner.events.drain(..).collect();
        inner.total_flushed += events.len() as u64;
        debug!(count = events.len(), "Drained event queue");
        events
    }

    /// Return undelivered events to the head of the queue
    ///
    /// The events keep their relative order and go in front of anything
    /// enqueued meanwhile, since they are older. If that overfills the queue
    /// the oldest entries are evicted as usual.
    pub fn requeue(&self, events: Vec<QueuedEvent>) {
        if events.is_empty() {
            return;
        }

        let mut inner = self.lock();
        let count = events.len();
        inner.total_requeued += count as u64;

        for event in events.into_iter().rev() {
            inner.events.push_front(event);
        }

        let mut evicted = 0u64;
        while inner.events.len() > self.max_size {
            inner.events.pop_front();
            evicted += 1;
        }
        inner.total_dropped += evicted;

        if evicted > 0 {
            warn!(
                requeued = count,
                evicted, "Re-queued events overflowed the queue, oldest dropped"
            );
        } else {
            debug!(requeued = count, "Re-queued undelivered events");
        }
    }

    /// Discard every queued event without counting it as flushed
    ///
    /// Administrative use only.
    pub fn clear(&self) {
        self.lock().events.clear();
    }

    /// Number of queued events
    pub fn size(&self) -> usize {
        self.lock().events.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    /// Maximum capacity
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Get statistics
    pub fn metrics(&self) -> QueueMetrics {
        let inner = self.lock();
        QueueMetrics {
            size: inner.events.len(),
            max_size: self.max_size,
            total_enqueued: inner.total_enqueued,
            total_dropped: inner.total_dropped,
            total_flushed: inner.total_flushed,
            total_requeued: inner.total_requeued,
        }
    }

    /// Zero the counters, keeping queued events
    pub fn reset_metrics(&self) {
        let mut inner = self.lock();
        inner.total_enqueued = 0;
        inner.total_dropped = 0;
        inner.total_flushed = 0;
        inner.total_requeued = 0;
    }
}
