//! Error type and operational classification.

use thiserror::Error;

use super::ids::PaymentId;
use crate::ports::queue_channel::TransportError;
use crate::typed::codec::CodecError;

/// How an error should be treated by retry logic.
///
/// - Transient: may succeed later (retry)
/// - Permanent: retrying cannot help
/// - Infrastructure: store/broker failure (retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment not found: {0}")]
    NotFound(String),

    #[error("payment with reference '{reference}' already exists")]
    Conflict { reference: String },

    #[error("invalid payment request: {0}")]
    Invalid(String),

    #[error("record store unavailable: {0}")]
    Storage(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Malformed(#[from] CodecError),
}

impl PaymentError {
    pub fn not_found(id: PaymentId) -> Self {
        PaymentError::NotFound(id.to_string())
    }

    pub fn reference_not_found(reference: &str) -> Self {
        PaymentError::NotFound(format!("reference '{reference}'"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            // The row may simply not be visible yet.
            PaymentError::NotFound(_) => ErrorKind::Transient,
            PaymentError::Conflict { .. }
            | PaymentError::Invalid(_)
            | PaymentError::Malformed(_) => ErrorKind::Permanent,
            PaymentError::Storage(_) | PaymentError::Transport(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() != ErrorKind::Permanent
    }
}
