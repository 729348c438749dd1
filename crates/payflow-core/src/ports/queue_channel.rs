//! QueueChannel port - at-least-once の配送チャネル（AMQP または InMemory）
//!
//! キューに流れるのは処理指示（payment_id）のみ。状態や金額は RecordStore にある。
//!
//! # ライフサイクル
//! - `Connection`: ブローカー接続。`open_channel()` でチャネルを払い出し、`close()` で閉じる
//! - `QueueChannel`: スコープ付きハンドル。drop すると未確定の delivery はキューに戻る
//! - `Delivery`: 受信した 1 件。`ack` か `nack` で必ず確定させる
//!
//! # 配送保証
//! - ack されるまでメッセージは消えない（at-least-once）
//! - 同じメッセージが複数回届くことがある。受信側は冪等であること

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::DeliveryId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("broker connection is closed")]
    Closed,

    #[error("queue not declared: {0}")]
    UnknownQueue(String),

    /// The delivery was already settled, or its channel went away.
    #[error("delivery {0} is no longer outstanding")]
    DeliveryGone(DeliveryId),
}

/// Queue declaration. Declaring the same spec twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,

    /// Where `Nack::DeadLetter` sends messages. `None` drops them.
    pub dead_letter: Option<String>,
}

impl QueueSpec {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter = Some(queue.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub content_type: String,

    /// Survive a broker restart.
    pub persistent: bool,
}

/// Negative acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nack {
    /// Put the message back; the broker redelivers it after `delay`.
    /// Other messages keep flowing in the meantime.
    Requeue { delay: Duration },

    /// Drop the message for good.
    Discard,

    /// Move the message to the queue's dead-letter queue.
    DeadLetter { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Deliverable now.
    pub ready: u64,
    /// Waiting for a delayed redelivery.
    pub scheduled: u64,
    /// Handed to a consumer, not yet settled.
    pub in_flight: u64,
    pub acked: u64,
    pub discarded: u64,
    pub dead_lettered: u64,
}

impl QueueStats {
    /// Messages that have not reached a final disposition.
    pub fn outstanding(&self) -> u64 {
        self.ready + self.scheduled + self.in_flight
    }
}

/// 受信した 1 件のメッセージ
///
/// `ack` / `nack` は self を消費するので、二重確定はコンパイル時に防がれる。
#[async_trait]
pub trait Delivery: Send {
    fn id(&self) -> DeliveryId;

    fn queue(&self) -> &str;

    fn body(&self) -> &[u8];

    fn content_type(&self) -> &str;

    /// 1 for the first delivery, incremented on each redelivery.
    fn attempt(&self) -> u32;

    async fn ack(self: Box<Self>) -> Result<(), TransportError>;

    async fn nack(self: Box<Self>, nack: Nack) -> Result<(), TransportError>;
}

#[async_trait]
pub trait QueueChannel: Send + Sync {
    async fn declare(&self, spec: &QueueSpec) -> Result<(), TransportError>;

    /// Hand a message to the broker. Fire-and-forget: the caller does not
    /// learn whether anyone consumed it.
    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), TransportError>;

    /// Wait for the next delivery.
    ///
    /// `Ok(None)` once the connection is closed. Cancel-safe: dropping the
    /// future never loses a message.
    async fn receive(&self, queue: &str) -> Result<Option<Box<dyn Delivery>>, TransportError>;

    async fn stats(&self, queue: &str) -> Result<QueueStats, TransportError>;
}

/// ブローカー接続
///
/// 取り込み（intake）と処理（processor）の両方に注入する。
/// グローバルな接続ハンドルは持たない。
#[async_trait]
pub trait Connection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn QueueChannel>, TransportError>;

    /// Close the connection. Unsettled deliveries of every channel go back
    /// to their queues.
    async fn close(&self);

    fn is_open(&self) -> bool;
}
