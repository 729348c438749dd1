//! Retry policy: decides redelivery delays.

use std::time::Duration;

/// Backoff for failed deliveries.
///
/// delay = base_delay * multiplier^(attempt - 1), capped at `max_delay`.
/// A multiplier of 1.0 gives a fixed delay.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Same delay after every failure.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, 1.0, delay)
    }

    /// Delay before redelivering a message that has failed `attempt` times
    /// (1-indexed). `attempt == 0` is treated like the first failure.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        // negative multipliers flip the sign on odd exponents
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        if secs.is_infinite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPolicy {
    /// Fixed 5s.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}
