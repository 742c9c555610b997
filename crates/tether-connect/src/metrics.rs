//! Client counters and the snapshots built from them

use crate::state::ConnectionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tether_core_queue::{BatcherMetrics, QueueMetrics};
use tether_core_resilience::BreakerMetrics;

/// Reconnection bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectMetrics {
    /// Connection attempts started, including the first
    pub attempts: u64,
    /// Attempts that reached `Authenticated`
    pub successes: u64,
    /// Connections that ended in a failure
    pub failures: u64,
    /// Delay the next scheduled attempt will wait
    pub current_delay: Duration,
    /// Whether an attempt is currently scheduled
    pub scheduled: bool,
}

/// Point-in-time view of the whole client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMetrics {
    pub state: ConnectionState,
    /// Events sent as individual EVENT envelopes
    pub events_transmitted: u64,
    /// Batch envelopes sent
    pub batches_transmitted: u64,
    pub events_filtered: u64,
    pub events_rate_limited: u64,
    /// Outbound frames the transport refused
    pub transmit_failures: u64,
    pub acks_received: u64,
    pub server_errors: u64,
    pub last_pong: Option<SystemTime>,
    pub queue: QueueMetrics,
    pub batcher: Option<BatcherMetrics>,
    pub breaker: BreakerMetrics,
    pub reconnect: ReconnectMetrics,
}

#[derive(Debug, Default)]
pub(crate) struct ClientCounters {
    pub events_transmitted: AtomicU64,
    pub batches_transmitted: AtomicU64,
    pub events_filtered: AtomicU64,
    pub events_rate_limited: AtomicU64,
    pub transmit_failures: AtomicU64,
    pub acks_received: AtomicU64,
    pub server_errors: AtomicU64,
    pub connect_attempts: AtomicU64,
    pub connect_successes: AtomicU64,
    pub connect_failures: AtomicU64,
    last_pong: Mutex<Option<SystemTime>>,
}

impl ClientCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn record_pong(&self) {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner) = Some(SystemTime::now());
    }

    pub(crate) fn last_pong(&self) -> Option<SystemTime> {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.events_transmitted,
            &self.batches_transmitted,
            &self.events_filtered,
            &self.events_rate_limited,
            &self.transmit_failures,
            &self.acks_received,
            &self.server_errors,
            &self.connect_attempts,
            &self.connect_successes,
            &self.connect_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
