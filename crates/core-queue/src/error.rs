//! Error types for the tether-core-queue crate

use thiserror::Error;

/// Errors raised when building a queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue capacity must be greater than zero (got {0})")]
    InvalidCapacity(usize),
}

/// Errors raised by the batcher
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatcherError {
    /// The batcher no longer accepts events; the payload is handed back
    #[error("Batcher is shut down")]
    ShutDown(String),

    #[error("Invalid batcher configuration: {0}")]
    InvalidConfig(String),

    #[error("Batcher must be started inside a tokio runtime")]
    NoRuntime,
}

/// Returned by a batch sink that could not take a batch
///
/// The sink owns the batch once called; if it fails it is responsible for
/// putting the events somewhere safe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Batch of {count} events rejected: {reason}")]
pub struct BatchRejected {
    pub count: usize,
    pub reason: String,
}

impl BatchRejected {
    pub fn new(count: usize, reason: impl Into<String>) -> Self {
        Self {
            count,
            reason: reason.into(),
        }
    }
}
