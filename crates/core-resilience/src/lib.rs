//! Tether Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the building blocks the delivery client uses to stay
//! well-behaved while its remote endpoint is flaky:
//!
//! - **Circuit Breaker**: Refuses connection attempts after repeated failure,
//!   then tests for recovery with a bounded number of half-open trials
//! - **Reconnect Backoff**: Geometric, capped delay between reconnect attempts
//! - **Admission Gate**: Sliding-window rate limiting of inbound events
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Transports (WebSocket, TCP)
//! - Wire formats
//! - Async runtimes
//!
//! Every primitive is synchronous and safe to share across threads.
//!
//! # Architecture
//!
//! ```text
//!   producer threads
//!          │
//!          ▼
//! ┌─────────────────────────────────────────┐
//! │       Admission Gate                    │  ← Bound inbound rate
//! │  (Sliding window, never blocks)         │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!        delivery client ──── on failure ────┐
//!               │                            ▼
//!               │             ┌──────────────────────────────┐
//!               │             │    Reconnect Schedule        │  ← 5s, 7.5s, 11.25s …
//!               │             └──────────────┬───────────────┘
//!               ▼                            ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Gate every attempt
//! │  (Closed / Open / HalfOpen)             │
//! └─────────────┬───────────────────────────┘
//!               ▼
//!         remote platform
//! ```
//!
//! # Usage Example
//!
//! ```
//! use tether_core_resilience::{
//!     BackoffConfig, CircuitBreaker, CircuitBreakerConfig, ReconnectSchedule,
//! };
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//! let mut schedule = ReconnectSchedule::new(BackoffConfig::default());
//!
//! // Connection attempt failed
//! breaker.record_failure();
//! if breaker.allow_connection() {
//!     let delay = schedule.advance();
//!     assert_eq!(delay.as_secs(), 5);
//! }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;

// Re-export main types for convenience
pub use backoff::{BackoffConfig, ReconnectSchedule};
pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::ResilienceError;
pub use rate_limiter::{AdmissionGate, RateLimiter, UnlimitedGate};

#[cfg(feature = "governor-impl")]
pub use rate_limiter::governor_impl::GovernorRateLimiter;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tether_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::backoff::{BackoffConfig, ReconnectSchedule};
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::{AdmissionGate, RateLimiter, UnlimitedGate};
}
