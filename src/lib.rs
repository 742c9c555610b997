/*!
 * Tether - resilient event delivery to a remote ingestion service
 *
 * Producers hand events to an `EventPublisher`; the pipeline authenticates
 * over a persistent WebSocket connection and delivers them with:
 * - Bounded in-memory queueing while disconnected (oldest dropped first)
 * - Size/time based batching while connected
 * - Circuit-breaker gated reconnection with exponential backoff
 * - Optional regex filtering and admission rate limiting
 *
 * Delivery is at-least-once, best effort; nothing is persisted.
 */

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pipeline;

// Re-export commonly used types
pub use config::{ConfigIssue, LogLevel, TetherConfig};
pub use error::{ErrorCategory, Result, TetherError};
pub use filter::{FilterDecision, RegexEventFilter};
pub use pipeline::{EventPipeline, EventPublisher, SharedSettingsProvider, StaticSettingsProvider};

pub use tether_connect::{
    ClientMetrics, ConnectionState, DeliveryError, OutboundFrame, SendOutcome, Transport,
    TransportEvent, TransportLink,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
