//! Settlement decision: which terminal status a pending payment ends in.

use super::payment::{Payment, TerminalStatus};

/// Decides the outcome of a pending payment.
///
/// Called by the record store inside the atomic transition, only while the
/// row is `Pending`, so it runs at most once per payment. It must not block or
/// perform I/O.
pub trait Settler: Send + Sync {
    fn decide(&self, payment: &Payment) -> TerminalStatus;
}

/// Settles every payment as `Success`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl Settler for ApproveAll {
    fn decide(&self, _payment: &Payment) -> TerminalStatus {
        TerminalStatus::Success
    }
}

impl<F> Settler for F
where
    F: Fn(&Payment) -> TerminalStatus + Send + Sync,
{
    fn decide(&self, payment: &Payment) -> TerminalStatus {
        self(payment)
    }
}
