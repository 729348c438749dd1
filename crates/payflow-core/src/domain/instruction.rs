//! Processing instruction: the only message that travels through the queue.

use serde::{Deserialize, Serialize};

use super::ids::PaymentId;
use crate::typed::Message;

/// Default name of the durable queue carrying processing instructions.
pub const PAYMENT_PROCESSING_QUEUE: &str = "payment_processing";

/// "Please settle this payment." Carries nothing but the id; the record store
/// holds all authoritative state, so duplicates and reordering are harmless.
///
/// Wire form: `{"payment_id":"<ULID>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessingInstruction {
    pub payment_id: PaymentId,
}

impl ProcessingInstruction {
    pub fn new(payment_id: PaymentId) -> Self {
        Self { payment_id }
    }
}

impl Message for ProcessingInstruction {
    const KIND: &'static str = "payment.process.v1";
}
