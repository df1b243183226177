//! Session-establishment retry policy.
//!
//! A policy is a pure mapping from the number of retries already performed to
//! either a delay before the next attempt or "give up". Retries live at the
//! session level only; node operations never retry here.

use std::time::Duration;

use treekeeper_types::ConnectionConfig;

/// A fixed-delay, bounded-attempt retry policy with optional jitter.
///
/// Stateless and thread-safe by construction: callers track the attempt count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
    jitter: f64,
}

impl RetryPolicy {
    /// The delay used when none is configured.
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(6);

    /// A policy that retries `max_retries` times with the default delay.
    #[must_use]
    pub fn n_times(max_retries: u32) -> Self {
        Self::n_times_with_delay(max_retries, Self::DEFAULT_DELAY)
    }

    /// A policy that retries `max_retries` times with a fixed `delay`.
    #[must_use]
    pub fn n_times_with_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            jitter: 0.0,
        }
    }

    /// Derives the policy from a connection configuration.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_interval,
            jitter: config.retry_jitter.clamp(0.0, 1.0),
        }
    }

    /// Adds a jitter factor (0.0 - 1.0) to spread concurrent redials.
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns the delay before the next attempt, given how many retries have
    /// already been performed, or `None` once the budget is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        if self.jitter <= 0.0 {
            return Some(self.delay);
        }
        let factor = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter;
        Some(self.delay.mul_f64(factor.max(0.0)))
    }

    /// The configured retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_below_budget() {
        let policy = RetryPolicy::n_times(3);
        assert_eq!(policy.next_delay(0), Some(RetryPolicy::DEFAULT_DELAY));
        assert_eq!(policy.next_delay(2), Some(RetryPolicy::DEFAULT_DELAY));
    }

    #[test]
    fn test_gives_up_at_budget() {
        let policy = RetryPolicy::n_times(3);
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(100), None);
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::n_times(0);
        assert_eq!(policy.next_delay(0), None);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy =
            RetryPolicy::n_times_with_delay(10, Duration::from_millis(1000)).with_jitter(0.2);
        for attempt in 0..10 {
            let delay = policy.next_delay(attempt).unwrap();
            assert!(delay >= Duration::from_millis(800), "delay {delay:?} too short");
            assert!(delay <= Duration::from_millis(1200), "delay {delay:?} too long");
        }
    }

    #[test]
    fn test_from_config() {
        let config = ConnectionConfig::default();
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries(), config.max_retries);
        assert_eq!(policy.next_delay(0), Some(config.retry_interval));
    }
}
