//! Payment record and its status state machine.
//!
//! State transitions:
//! - Pending -> Success
//! - Pending -> Failed
//!
//! Success and Failed are terminal. Nothing leaves a terminal state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::PaymentError;
use super::ids::PaymentId;

/// Longest accepted reference (matches the storage column width).
pub const MAX_REFERENCE_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status a settlement may end in. Keeping it separate from
/// `PaymentStatus` means a settlement decision can never produce `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalStatus {
    Success,
    Failed,
}

impl From<TerminalStatus> for PaymentStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Success => PaymentStatus::Success,
            TerminalStatus::Failed => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "ETB")]
    Etb,
    #[serde(rename = "USD")]
    Usd,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Etb => "ETB",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ETB" => Ok(Currency::Etb),
            "USD" => Ok(Currency::Usd),
            other => Err(PaymentError::Invalid(format!(
                "unsupported currency: {other}"
            ))),
        }
    }
}

/// A creation request as handed to the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPayment {
    pub amount: Decimal,
    pub currency: Currency,
    pub reference: String,
}

impl NewPayment {
    pub fn new(amount: Decimal, currency: Currency, reference: impl Into<String>) -> Self {
        Self {
            amount,
            currency,
            reference: reference.into(),
        }
    }

    /// Field checks done by the intake before calling the store.
    pub fn validate(&self) -> Result<(), PaymentError> {
        if self.amount <= Decimal::ZERO {
            return Err(PaymentError::Invalid(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.reference.trim().is_empty() {
            return Err(PaymentError::Invalid("reference is required".into()));
        }
        if self.reference.chars().count() > MAX_REFERENCE_LEN {
            return Err(PaymentError::Invalid(format!(
                "reference longer than {MAX_REFERENCE_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// The unit of work.
///
/// Mutation goes through `settle`; `id`, `amount`, `currency`, `reference`
/// and `created_at` are fixed once the record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Decimal,
    pub currency: Currency,
    pub reference: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn pending(id: PaymentId, request: NewPayment, now: DateTime<Utc>) -> Self {
        Self {
            id,
            amount: request.amount,
            currency: request.currency,
            reference: request.reference,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a terminal status. Returns `false` (and changes nothing) if the
    /// payment already left `Pending`.
    pub fn settle(&mut self, outcome: TerminalStatus, now: DateTime<Utc>) -> bool {
        if self.status != PaymentStatus::Pending {
            return false;
        }
        self.status = outcome.into();
        self.updated_at = now;
        true
    }
}
