//! Decision model: what to do with a delivery whose handler failed.
//!
//! Deciders are pure: given the delivery attempt and the error they return the
//! next action. Executing it (nack with delay, dead-letter) is the consumer's
//! job.

use std::time::Duration;

use super::errors::PaymentError;
use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Ask the broker to redeliver after `delay`.
    Retry { delay: Duration, reason: String },

    /// Give up and park the message in the dead-letter queue.
    DeadLetter { reason: String },
}

pub trait Decider: Send + Sync {
    /// `attempt` is the 1-based delivery count of the failed delivery.
    fn decide(&self, attempt: u32, error: &PaymentError) -> Decision;
}

/// Attempt-based retry with backoff and an optional cap.
///
/// - permanent errors dead-letter immediately
/// - `attempt >= max_attempts` dead-letters
/// - otherwise retry after `RetryPolicy::next_delay(attempt)`
///
/// `max_attempts: None` retries forever.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
    max_attempts: Option<u32>,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy, max_attempts: Option<u32>) -> Self {
        Self {
            retry_policy,
            max_attempts,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), Some(10))
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, attempt: u32, error: &PaymentError) -> Decision {
        if !error.is_retryable() {
            return Decision::DeadLetter {
                reason: format!("permanent failure: {error}"),
            };
        }

        if let Some(max) = self.max_attempts
            && attempt >= max
        {
            return Decision::DeadLetter {
                reason: format!("max attempts reached: {attempt}/{max}: {error}"),
            };
        }

        let delay = self.retry_policy.next_delay(attempt);
        Decision::Retry {
            delay,
            reason: format!("attempt {attempt} failed, retrying after {delay:?}: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::codec::CodecError;
    use rstest::rstest;

    fn decider(max: Option<u32>) -> DefaultDecider {
        DefaultDecider::new(RetryPolicy::fixed(Duration::from_millis(10)), max)
    }

    #[rstest]
    #[case::first_attempt(1, true)]
    #[case::below_cap(2, true)]
    #[case::at_cap(3, false)]
    #[case::past_cap(9, false)]
    fn caps_transient_retries(#[case] attempt: u32, #[case] retries: bool) {
        let err = PaymentError::NotFound("pay-x".into());
        let decision = decider(Some(3)).decide(attempt, &err);
        assert_eq!(matches!(decision, Decision::Retry { .. }), retries);
    }

    #[test]
    fn unbounded_decider_always_retries() {
        let err = PaymentError::Storage("down".into());
        let decision = decider(None).decide(10_000, &err);
        assert_eq!(
            decision,
            Decision::Retry {
                delay: Duration::from_millis(10),
                reason: format!(
                    "attempt 10000 failed, retrying after {:?}: {err}",
                    Duration::from_millis(10)
                ),
            }
        );
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let err = PaymentError::Malformed(CodecError::Decode("eof".into()));
        let decision = decider(None).decide(1, &err);
        assert!(matches!(decision, Decision::DeadLetter { .. }));
    }
}
