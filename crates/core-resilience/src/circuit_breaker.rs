//! Circuit Breaker implementation for connection attempts
//!
//! The circuit breaker stops a client from hammering an endpoint that keeps
//! failing. It has three states:
//! - Closed: Normal operation, connection attempts pass through
//! - Open: Endpoint is unhealthy, attempts are refused until the timeout elapses
//! - HalfOpen: A limited number of trial attempts test for recovery
//!
//! Unlike a call-wrapping breaker, this one is consulted explicitly: the
//! owner asks [`CircuitBreaker::allow_connection`] before every attempt and
//! feeds the outcome back with [`CircuitBreaker::record_success`] or
//! [`CircuitBreaker::record_failure`]. All methods are synchronous so that
//! both producer threads and async tasks can consult it without `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, attempts pass through normally
    Closed,
    /// Circuit is open, attempts are refused
    Open,
    /// Circuit is half-open, trial attempts are permitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from open to half-open
    pub timeout: Duration,
    /// Number of trial attempts permitted while half-open
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_max_attempts: 3,
        }
    }
}

/// Point-in-time view of the breaker, taken under its lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures recorded since the last success
    pub consecutive_failures: u32,
    /// Trial attempts consumed in the current half-open period
    pub half_open_attempts: u32,
    /// Number of times the circuit has opened
    pub trips: u64,
    /// Number of half-open to closed recoveries
    pub recoveries: u64,
    /// Whether the breaker is held open until a manual reset
    pub latched: bool,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_attempts: u32,
    state_entered_at: Instant,
    /// Set by `trip()`; suppresses the automatic open -> half-open move
    latched: bool,
    trips: u64,
    recoveries: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_attempts: 0,
            state_entered_at: Instant::now(),
            latched: false,
            trips: 0,
            recoveries: 0,
        }
    }

    /// Every transition restarts the half-open attempt budget
    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        self.state = to;
        self.state_entered_at = Instant::now();
        self.half_open_attempts = 0;

        match (from, to) {
            (_, CircuitState::Open) if from != CircuitState::Open => self.trips += 1,
            (CircuitState::HalfOpen, CircuitState::Closed) => self.recoveries += 1,
            _ => {}
        }

        debug!(from = %from, to = %to, "Circuit breaker transition");
    }
}

/// Circuit breaker guarding connection attempts
///
/// Cloning is cheap; all clones share the same state.
///
/// # Example
/// ```
/// use tether_core_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig {
///     failure_threshold: 2,
///     timeout: Duration::from_secs(30),
///     half_open_max_attempts: 1,
/// });
///
/// assert!(breaker.allow_connection());
/// breaker.record_failure();
/// breaker.record_failure();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.allow_connection());
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Get current consecutive failure count
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Whether the breaker is held open until `reset()`
    pub fn is_latched(&self) -> bool {
        self.lock().latched
    }

    /// Decide whether a connection attempt may proceed
    ///
    /// Side effects: an open breaker whose timeout has elapsed moves to
    /// half-open, and every permitted half-open attempt consumes one unit of
    /// the half-open budget. Exhausting the budget reopens the circuit.
    pub fn allow_connection(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if state.latched {
                    return false;
                }
                if state.state_entered_at.elapsed() >= self.config.timeout {
                    state.transition(CircuitState::HalfOpen);
                    state.half_open_attempts = 1;
                    info!("Circuit breaker half-open, permitting trial connection");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_attempts >= self.config.half_open_max_attempts {
                    warn!(
                        attempts = state.half_open_attempts,
                        "Half-open attempt budget exhausted, reopening circuit"
                    );
                    state.transition(CircuitState::Open);
                    false
                } else {
                    state.half_open_attempts += 1;
                    true
                }
            }
        }
    }

    /// Time left before an open breaker will permit a trial attempt
    ///
    /// Returns `None` when the breaker is not open or is latched (no
    /// automatic recovery will happen).
    pub fn remaining_open_time(&self) -> Option<Duration> {
        let state = self.lock();
        match state.state {
            CircuitState::Open if !state.latched => Some(
                self.config
                    .timeout
                    .saturating_sub(state.state_entered_at.elapsed()),
            ),
            _ => None,
        }
    }

    /// Record a successful connection
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;

        match state.state {
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                state.transition(CircuitState::Closed);
                info!("Circuit breaker recovered, closing circuit");
            }
            CircuitState::Open if state.latched => {
                debug!("Ignoring success while the circuit is latched open");
            }
            CircuitState::Open => {
                // An attempt admitted before the trip succeeded late
                state.transition(CircuitState::Closed);
            }
        }
    }

    /// Record a failed connection
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        failures = state.consecutive_failures,
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        "Circuit breaker tripped"
                    );
                    state.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Trial connection failed, reopening circuit");
                state.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker open and hold it there until `reset()`
    pub fn trip(&self) {
        let mut state = self.lock();
        state.latched = true;
        if state.state != CircuitState::Open {
            state.transition(CircuitState::Open);
        }
        warn!("Circuit breaker latched open until manual reset");
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.lock();
        state.latched = false;
        state.consecutive_failures = 0;
        if state.state != CircuitState::Closed {
            state.transition(CircuitState::Closed);
        }
        state.half_open_attempts = 0;
    }

    /// Snapshot of state and counters
    pub fn metrics(&self) -> BreakerMetrics {
        let state = self.lock();
        BreakerMetrics {
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            half_open_attempts: state.half_open_attempts,
            trips: state.trips,
            recoveries: state.recoveries,
            latched: state.latched,
        }
    }
}
