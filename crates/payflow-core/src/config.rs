//! Pipeline configuration.
//!
//! Defaults give a fixed 5s redelivery delay and a cap of 10 deliveries.
//! Every knob can be overridden through `PAYFLOW_*`
//! environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DefaultDecider, PAYMENT_PROCESSING_QUEUE, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    Parse { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayflowConfig {
    pub queue: String,
    pub dead_letter_queue: Option<String>,

    /// Consumer loops, one channel each.
    pub workers: usize,

    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,

    /// Deliveries before an instruction is dead-lettered. 0 = unbounded.
    pub max_attempts: u32,

    pub outbox_interval_ms: u64,

    /// Outbox entries younger than this are left to the intake's own publish.
    pub outbox_grace_ms: u64,
    pub outbox_batch: usize,
}

impl Default for PayflowConfig {
    fn default() -> Self {
        Self {
            queue: PAYMENT_PROCESSING_QUEUE.to_string(),
            dead_letter_queue: Some(format!("{PAYMENT_PROCESSING_QUEUE}.dead_letter")),
            workers: 2,
            retry_base_delay_ms: 5_000,
            retry_multiplier: 1.0,
            retry_max_delay_ms: 60_000,
            max_attempts: 10,
            outbox_interval_ms: 1_000,
            outbox_grace_ms: 2_000,
            outbox_batch: 100,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Parse { var, value: raw }),
    }
}

impl PayflowConfig {
    /// Read `PAYFLOW_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();

        let queue = lookup("PAYFLOW_QUEUE").unwrap_or(d.queue);
        // Empty string disables dead-lettering.
        let dead_letter_queue = match lookup("PAYFLOW_DEAD_LETTER_QUEUE") {
            Some(name) if name.trim().is_empty() => None,
            Some(name) => Some(name),
            None => Some(format!("{queue}.dead_letter")),
        };

        let config = Self {
            queue,
            dead_letter_queue,
            workers: parse_var(&lookup, "PAYFLOW_WORKERS", d.workers)?,
            retry_base_delay_ms: parse_var(
                &lookup,
                "PAYFLOW_RETRY_BASE_DELAY_MS",
                d.retry_base_delay_ms,
            )?,
            retry_multiplier: parse_var(&lookup, "PAYFLOW_RETRY_MULTIPLIER", d.retry_multiplier)?,
            retry_max_delay_ms: parse_var(
                &lookup,
                "PAYFLOW_RETRY_MAX_DELAY_MS",
                d.retry_max_delay_ms,
            )?,
            max_attempts: parse_var(&lookup, "PAYFLOW_MAX_ATTEMPTS", d.max_attempts)?,
            outbox_interval_ms: parse_var(
                &lookup,
                "PAYFLOW_OUTBOX_INTERVAL_MS",
                d.outbox_interval_ms,
            )?,
            outbox_grace_ms: parse_var(&lookup, "PAYFLOW_OUTBOX_GRACE_MS", d.outbox_grace_ms)?,
            outbox_batch: parse_var(&lookup, "PAYFLOW_OUTBOX_BATCH", d.outbox_batch)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigError::Invalid("queue name is empty".into()));
        }
        if self.dead_letter_queue.as_deref() == Some(self.queue.as_str()) {
            return Err(ConfigError::Invalid(
                "dead-letter queue must differ from the main queue".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.outbox_batch == 0 {
            return Err(ConfigError::Invalid("outbox batch must be at least 1".into()));
        }
        if self.retry_multiplier.is_nan() || self.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry multiplier must be >= 1.0, got {}",
                self.retry_multiplier
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_multiplier,
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    pub fn decider(&self) -> DefaultDecider {
        DefaultDecider::new(self.retry_policy(), self.max_attempts())
    }

    pub fn outbox_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_interval_ms)
    }

    pub fn outbox_grace(&self) -> Duration {
        Duration::from_millis(self.outbox_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_use_processing_queue_and_fixed_delay() {
        let config = PayflowConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PayflowConfig::default());
        assert_eq!(config.queue, "payment_processing");
        assert_eq!(
            config.dead_letter_queue.as_deref(),
            Some("payment_processing.dead_letter")
        );
        assert_eq!(
            config.retry_policy().next_delay(7),
            Duration::from_secs(5)
        );
        assert_eq!(config.max_attempts(), Some(10));
    }

    #[test]
    fn overrides_are_applied() {
        let config = PayflowConfig::from_lookup(lookup(&[
            ("PAYFLOW_QUEUE", "payments"),
            ("PAYFLOW_WORKERS", "8"),
            ("PAYFLOW_MAX_ATTEMPTS", "0"),
            ("PAYFLOW_RETRY_MULTIPLIER", "2.0"),
        ]))
        .unwrap();

        assert_eq!(config.queue, "payments");
        assert_eq!(config.dead_letter_queue.as_deref(), Some("payments.dead_letter"));
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_attempts(), None);
        assert_eq!(config.retry_multiplier, 2.0);
    }

    #[test]
    fn empty_dead_letter_name_disables_it() {
        let config =
            PayflowConfig::from_lookup(lookup(&[("PAYFLOW_DEAD_LETTER_QUEUE", "")])).unwrap();
        assert_eq!(config.dead_letter_queue, None);
    }

    #[test]
    fn garbage_is_an_error_not_a_default() {
        let err = PayflowConfig::from_lookup(lookup(&[("PAYFLOW_WORKERS", "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Parse {
                var: "PAYFLOW_WORKERS",
                value: "many".into()
            }
        );
    }

    #[test]
    fn validate_rejects_nonsense() {
        for vars in [
            [("PAYFLOW_WORKERS", "0")],
            [("PAYFLOW_OUTBOX_BATCH", "0")],
            [("PAYFLOW_RETRY_MULTIPLIER", "0.5")],
            [("PAYFLOW_DEAD_LETTER_QUEUE", "payment_processing")],
        ] {
            assert!(matches!(
                PayflowConfig::from_lookup(lookup(&vars)),
                Err(ConfigError::Invalid(_))
            ));
        }
    }
}
