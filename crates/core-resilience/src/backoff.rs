//! Reconnect backoff: geometric delay growth with a cap
//!
//! Each scheduled reconnect takes the current delay and grows it for the
//! next attempt; a successful connection resets it.
//!
//! # Example
//!
//! ```
//! use tether_core_resilience::backoff::{BackoffConfig, ReconnectSchedule};
//! use std::time::Duration;
//!
//! let mut schedule = ReconnectSchedule::new(BackoffConfig::default());
//!
//! assert_eq!(schedule.advance(), Duration::from_secs(5));
//! assert_eq!(schedule.advance(), Duration::from_millis(7500));
//!
//! schedule.reset();
//! assert_eq!(schedule.current_delay(), Duration::from_secs(5));
//! ```

use std::time::Duration;

/// Configuration for reconnect backoff
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,

    /// Multiplier applied after each failed attempt
    pub multiplier: f64,

    /// Upper bound on the delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 1.5,
            max_delay: Duration::from_secs(300),
        }
    }
}

/// Position in a run of consecutive reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectSchedule {
    config: BackoffConfig,
    attempt: u32,
    current_delay: Duration,
}

impl ReconnectSchedule {
    /// Create a schedule positioned at the initial delay
    pub fn new(config: BackoffConfig) -> Self {
        let current_delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            attempt: 0,
            current_delay,
        }
    }

    /// Delay the next attempt will wait
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Attempts scheduled since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get the configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Claim the delay for the attempt being scheduled and grow it for the next
    pub fn advance(&mut self) -> Duration {
        let delay = self.current_delay;
        self.attempt = self.attempt.saturating_add(1);

        let grown = self.current_delay.as_secs_f64() * self.config.multiplier.max(1.0);
        self.current_delay = if grown.is_finite() {
            Duration::from_secs_f64(grown).min(self.config.max_delay)
        } else {
            self.config.max_delay
        };

        delay
    }

    /// Return to the initial delay after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = self.config.initial_delay.min(self.config.max_delay);
    }

    /// Replace the configuration and restart from its initial delay
    pub fn reconfigure(&mut self, config: BackoffConfig) {
        self.config = config;
        self.reset();
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: Duration, expected_secs: f64) {
        let diff = (actual.as_secs_f64() - expected_secs).abs();
        assert!(
            diff < 0.01,
            "expected ~{}s, got {:?}",
            expected_secs,
            actual
        );
    }

    #[test]
    fn test_growth_sequence() {
        let mut schedule = ReconnectSchedule::default();

        let delays: Vec<Duration> = (0..6).map(|_| schedule.advance()).collect();

        let expected = [5.0, 7.5, 11.25, 16.875, 25.3125, 37.96875];
        for (actual, expected) in delays.iter().zip(expected.iter()) {
            assert_close(*actual, *expected);
        }
        assert_eq!(schedule.attempt(), 6);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut schedule = ReconnectSchedule::default();

        for _ in 0..50 {
            schedule.advance();
        }

        assert_eq!(schedule.current_delay(), Duration::from_secs(300));
        assert_eq!(schedule.advance(), Duration::from_secs(300));
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut schedule = ReconnectSchedule::default();
        schedule.advance();
        schedule.advance();

        schedule.reset();

        assert_eq!(schedule.attempt(), 0);
        assert_eq!(schedule.current_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_never_shrinks_with_low_multiplier() {
        let mut schedule = ReconnectSchedule::new(BackoffConfig {
            initial_delay: Duration::from_secs(2),
            multiplier: 0.5,
            max_delay: Duration::from_secs(10),
        });

        let first = schedule.advance();
        let second = schedule.advance();
        assert!(second >= first);
    }

    #[test]
    fn test_reconfigure() {
        let mut schedule = ReconnectSchedule::default();
        schedule.advance();

        schedule.reconfigure(BackoffConfig {
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(1),
        });

        assert_eq!(schedule.advance(), Duration::from_millis(100));
        assert_eq!(schedule.advance(), Duration::from_millis(200));
    }
}
