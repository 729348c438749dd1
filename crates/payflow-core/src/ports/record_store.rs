//! RecordStore port - 支払いの正本（source of truth）
//!
//! RecordStore は以下を管理します：
//! - 支払いレコード（Payment）と状態遷移
//! - reference の一意性
//! - 配送指示（outbox）
//!
//! # 設計原則
//! - 状態遷移（settle）は行単位で直列化された read-modify-write
//! - 支払いの作成と outbox エントリの作成は同一トランザクション
//! - キューに流れるのは payment_id だけ。状態はすべてここにある

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ApproveAll, NewPayment, OutboxEntry, Payment, PaymentError, PaymentId, Settler};

/// Number of payments per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.success + self.failed
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a Pending payment and its outbox entry in one unit of work.
    ///
    /// `Conflict` if the reference is taken. The check is repeated under the
    /// store's own write lock, so racing creations cannot both succeed.
    async fn create(&self, request: NewPayment) -> Result<Payment, PaymentError>;

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment, PaymentError>;

    async fn get_by_reference(&self, reference: &str) -> Result<Payment, PaymentError>;

    /// Idempotent transition Pending -> Success.
    async fn settle(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        self.settle_with(id, &ApproveAll).await
    }

    /// Idempotent transition Pending -> terminal, outcome chosen by `settler`.
    ///
    /// - not Pending: returns the record unchanged, `settler` is not called
    /// - Pending: writes `settler.decide(..)` and bumps `updated_at`
    ///
    /// Calls for the same id are serialized; exactly one of them observes
    /// Pending. Calls for different ids do not wait on each other.
    async fn settle_with(
        &self,
        id: PaymentId,
        settler: &dyn Settler,
    ) -> Result<Payment, PaymentError>;

    async fn count_by_status(&self) -> Result<StatusCounts, PaymentError>;

    /// Unpublished outbox entries created at or before `created_before`,
    /// oldest first.
    async fn pull_outbox(
        &self,
        limit: usize,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, PaymentError>;

    /// Mark an entry published. Acking twice is fine.
    async fn ack_outbox(&self, id: PaymentId) -> Result<(), PaymentError>;

    async fn fail_outbox(&self, id: PaymentId, error: &str) -> Result<(), PaymentError>;
}
