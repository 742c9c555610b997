//! The unit that moves through the queue and batcher

use std::time::{Duration, SystemTime};

/// A serialized event waiting for delivery
///
/// The payload is opaque: nothing in the pipeline inspects it beyond handing
/// it to the wire envelope. Once created the event is immutable, and it is
/// moved (never shared) from queue to batcher to transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEvent {
    payload: String,
    enqueued_at: SystemTime,
}

impl QueuedEvent {
    /// Wrap a payload, stamping the current time
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            enqueued_at: SystemTime::now(),
        }
    }

    /// The serialized event
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// When the event first entered the pipeline
    pub fn enqueued_at(&self) -> SystemTime {
        self.enqueued_at
    }

    /// Time spent in the pipeline so far
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed().unwrap_or_default()
    }

    /// Take the payload, consuming the event
    pub fn into_payload(self) -> String {
        self.payload
    }
}
