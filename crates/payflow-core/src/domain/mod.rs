//! Domain model (ids, payments, instructions, retry decisions, errors).

pub mod decision;
pub mod errors;
pub mod ids;
pub mod instruction;
pub mod outbox;
pub mod payment;
pub mod retry;
pub mod settlement;

pub use decision::{Decider, Decision, DefaultDecider};
pub use errors::{ErrorKind, PaymentError};
pub use ids::{DeliveryId, PaymentId};
pub use instruction::{PAYMENT_PROCESSING_QUEUE, ProcessingInstruction};
pub use outbox::OutboxEntry;
pub use payment::{Currency, NewPayment, Payment, PaymentStatus, TerminalStatus};
pub use retry::RetryPolicy;
pub use settlement::{ApproveAll, Settler};
