//! Per-caller request budget
//!
//! Injected into the router as a trait object so a distributed limiter can
//! replace the in-process one without touching the handlers.

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Budget check keyed by caller identity
pub trait CallerRateLimiter: Send + Sync {
    /// Ok when the caller may proceed, otherwise the time until it may retry
    fn check(&self, caller: &str) -> Result<(), Duration>;
}

/// In-process keyed GCRA limiter
///
/// Allows at most `requests` per rolling `window` per caller. One cell comes
/// back per `window`, so any `requests + 1` accepted calls span at least a
/// full window.
pub struct GovernorRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    clock: DefaultClock,
}

impl GovernorRateLimiter {
    pub fn new(requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window)
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }
}

impl CallerRateLimiter for GovernorRateLimiter {
    fn check(&self, caller: &str) -> Result<(), Duration> {
        let key = caller.to_string();
        let result = self
            .limiter
            .check_key(&key)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()));
        // Drop idle callers once their budget has fully refilled
        self.limiter.retain_recent();
        result
    }
}

/// Limiter that never refuses; used when rate limiting is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct UnlimitedRateLimiter;

impl CallerRateLimiter for UnlimitedRateLimiter {
    fn check(&self, _caller: &str) -> Result<(), Duration> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_budget_is_per_caller() {
        let limiter = GovernorRateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_ok());
        let retry_after = limiter.check("alice").unwrap_err();
        assert!(retry_after > Duration::ZERO);
        assert!(retry_after <= Duration::from_secs(60));

        assert!(limiter.check("bob").is_ok());
    }

    #[test]
    fn test_never_exceeds_budget_within_a_rolling_window() {
        let window = Duration::from_millis(400);
        let limiter = GovernorRateLimiter::new(2, window);
        let started = Instant::now();

        let mut accepted = Vec::new();
        while started.elapsed() < Duration::from_millis(1300) {
            if limiter.check("alice").is_ok() {
                accepted.push(Instant::now());
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let first_window = accepted.iter().filter(|t| t.duration_since(started) < window).count();
        assert_eq!(first_window, 2);
        // Refill does happen, but never faster than the window allows
        assert!(accepted.len() >= 3);
        for pair in accepted.windows(3) {
            assert!(pair[2].duration_since(pair[0]) >= window - Duration::from_millis(5));
        }
    }

    #[test]
    fn test_zero_requests_still_allows_one() {
        let limiter = GovernorRateLimiter::new(0, Duration::from_secs(60));
        assert!(limiter.check("alice").is_ok());
        assert!(limiter.check("alice").is_err());
    }

    #[test]
    fn test_unlimited() {
        let limiter = UnlimitedRateLimiter;
        for _ in 0..100 {
            assert!(limiter.check("alice").is_ok());
        }
    }
}
