//! Outbox entry: a publish intent recorded together with a payment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PaymentId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub payment_id: PaymentId,
    pub created_at: DateTime<Utc>,

    /// Set once the instruction reached the broker.
    pub published_at: Option<DateTime<Utc>>,

    /// Failed relay attempts.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn new(payment_id: PaymentId, created_at: DateTime<Utc>) -> Self {
        Self {
            payment_id,
            created_at,
            published_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    pub fn mark_published(&mut self, now: DateTime<Utc>) {
        if self.published_at.is_none() {
            self.published_at = Some(now);
        }
    }

    pub fn record_failure(&mut self, error: String) {
        self.attempts += 1;
        self.last_error = Some(error);
    }
}
