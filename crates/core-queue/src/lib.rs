//! Tether Core Queue: in-memory buffering between producers and the wire
//!
//! - [`BoundedEventQueue`]: fixed-capacity FIFO with drop-oldest overflow,
//!   used while no authenticated connection exists
//! - [`EventBatcher`]: size/time-triggered batching while connected
//!
//! Both are memory-only. Events still buffered when the process exits are
//! lost.

pub mod batcher;
pub mod error;
pub mod event;
pub mod queue;

pub use batcher::{BatchSink, BatcherConfig, BatcherMetrics, EventBatcher};
pub use error::{BatchRejected, BatcherError, QueueError};
pub use event::QueuedEvent;
pub use queue::{BoundedEventQueue, QueueMetrics};
