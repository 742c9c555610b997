//! Admission gating for inbound events
//!
//! Provides a sliding-window limiter that decides, without waiting, whether
//! an event may enter the delivery pipeline.

use super::error::ResilienceError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Non-blocking admission decision
///
/// Implementations must be cheap and must never sleep: they are called on
/// producer threads.
pub trait AdmissionGate: Send + Sync {
    /// Consume one admission if available
    fn try_acquire(&self) -> bool;

    /// Total rejected admissions since creation
    fn rejected(&self) -> u64 {
        0
    }
}

/// Gate that admits everything
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedGate;

impl AdmissionGate for UnlimitedGate {
    fn try_acquire(&self) -> bool {
        true
    }
}

/// Sliding-window rate limiter
///
/// At most `max_requests` admissions are granted in any trailing window of
/// length `period`.
///
/// # Example
/// ```
/// use tether_core_resilience::{AdmissionGate, RateLimiter};
/// use std::time::Duration;
///
/// let limiter = RateLimiter::new(2, Duration::from_secs(1));
///
/// assert!(limiter.try_acquire());
/// assert!(limiter.try_acquire());
/// assert!(!limiter.try_acquire());
/// ```
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed per period
    max_requests: u32,
    /// Length of the sliding window
    period: Duration,
    /// Admission instants still inside the window, oldest first
    window: Mutex<VecDeque<Instant>>,
    rejected: AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_requests` - Maximum number of admissions in any window
    /// * `period` - Length of the sliding window
    pub fn new(max_requests: u32, period: Duration) -> Self {
        Self {
            max_requests,
            period,
            window: Mutex::new(VecDeque::with_capacity((max_requests as usize).min(4096))),
            rejected: AtomicU64::new(0),
        }
    }

    /// Create a rate limiter, rejecting a zero budget or empty window
    pub fn try_new(max_requests: u32, period: Duration) -> Result<Self, ResilienceError> {
        if max_requests == 0 {
            return Err(ResilienceError::InvalidConfig(
                "max_requests must be > 0".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "period must be non-zero".to_string(),
            ));
        }
        Ok(Self::new(max_requests, period))
    }

    /// Create a rate limiter with requests per second
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(requests_per_second, Duration::from_secs(1))
    }

    /// Create a rate limiter with requests per minute
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(requests_per_minute, Duration::from_secs(60))
    }

    /// Try to admit without waiting
    ///
    /// Returns `RateLimitExceeded` if the window is full.
    pub fn check(&self) -> Result<(), ResilienceError> {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < self.max_requests as usize {
            window.push_back(now);
            Ok(())
        } else {
            drop(window);
            self.rejected.fetch_add(1, Ordering::Relaxed);
            Err(ResilienceError::RateLimitExceeded)
        }
    }

    /// Admissions still available in the current window
    pub fn available(&self) -> u32 {
        let now = Instant::now();
        let window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let live = window
            .iter()
            .filter(|t| now.duration_since(**t) < self.period)
            .count() as u32;
        self.max_requests.saturating_sub(live)
    }

    /// Get the maximum requests per period
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Get the rate limit period
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl AdmissionGate for RateLimiter {
    fn try_acquire(&self) -> bool {
        self.check().is_ok()
    }

    fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Token-bucket gate using the governor crate (when feature is enabled)
///
/// Smoother than the sliding window: admissions replenish continuously
/// instead of all at once when old stamps leave the window.
#[cfg(feature = "governor-impl")]
pub mod governor_impl {
    use super::*;
    use governor::{
        clock::DefaultClock,
        state::{InMemoryState, NotKeyed},
        Quota, RateLimiter as GovernorLimiter,
    };
    use std::num::NonZeroU32;

    /// Rate limiter wrapper using governor
    pub struct GovernorRateLimiter {
        limiter: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
        rejected: AtomicU64,
    }

    impl GovernorRateLimiter {
        /// Create a new governor-based rate limiter
        pub fn new(max_requests: u32, period: Duration) -> Result<Self, ResilienceError> {
            let max_requests = NonZeroU32::new(max_requests).ok_or_else(|| {
                ResilienceError::InvalidConfig("max_requests must be > 0".to_string())
            })?;

            let quota = Quota::with_period(period / max_requests.get())
                .ok_or_else(|| ResilienceError::InvalidConfig("Invalid period".to_string()))?
                .allow_burst(max_requests);

            Ok(Self {
                limiter: GovernorLimiter::direct(quota),
                rejected: AtomicU64::new(0),
            })
        }
    }

    impl AdmissionGate for GovernorRateLimiter {
        fn try_acquire(&self) -> bool {
            match self.limiter.check() {
                Ok(_) => true,
                Err(_) => {
                    self.rejected.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }

        fn rejected(&self) -> u64 {
            self.rejected.load(Ordering::Relaxed)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admits_up_to_budget() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.rejected(), 1);
        assert_eq!(limiter.available(), 0);
    }

    #[test]
    fn test_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(60));

        assert!(limiter.try_acquire());
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_check_error_kind() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check().is_ok());
        assert_eq!(limiter.check(), Err(ResilienceError::RateLimitExceeded));
    }

    #[test]
    fn test_try_new_validation() {
        assert!(RateLimiter::try_new(0, Duration::from_secs(1)).is_err());
        assert!(RateLimiter::try_new(1, Duration::ZERO).is_err());
        assert!(RateLimiter::try_new(1, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_rate_limiter_config() {
        let limiter = RateLimiter::per_second(100);
        assert_eq!(limiter.max_requests(), 100);
        assert_eq!(limiter.period(), Duration::from_secs(1));

        let limiter = RateLimiter::per_minute(60);
        assert_eq!(limiter.max_requests(), 60);
        assert_eq!(limiter.period(), Duration::from_secs(60));
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new(100, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..50).filter(|_| limiter.try_acquire()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(limiter.rejected(), 300);
    }

    #[test]
    fn test_unlimited_gate() {
        let gate = UnlimitedGate;
        for _ in 0..1000 {
            assert!(gate.try_acquire());
        }
        assert_eq!(gate.rejected(), 0);
    }
}
