//! Consumer - 配送 1 件ごとの ack / nack 判定
//!
//! # フロー
//! 1. QueueChannel::receive() で delivery を取得
//! 2. DynHandler でデコード + 処理
//! 3. 成功 → ack
//! 4. デコード失敗 → Nack::Discard（再配送しない）
//! 5. 処理失敗 → Decider → Nack::Requeue { delay } か Nack::DeadLetter
//!
//! 遅延はブローカー側で待つ。consumer はその間も次の delivery を処理できる。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::domain::{Decider, Decision, PaymentError};
use crate::ports::{Delivery, Nack, QueueChannel, TransportError};
use crate::typed::DynHandler;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    Discarded,
    Requeued { delay: Duration },
    DeadLettered,
}

pub struct Consumer {
    queue: String,
    handler: Arc<dyn DynHandler>,
    decider: Arc<dyn Decider>,
}

impl Consumer {
    pub fn new(
        queue: impl Into<String>,
        handler: Arc<dyn DynHandler>,
        decider: Arc<dyn Decider>,
    ) -> Self {
        Self {
            queue: queue.into(),
            handler,
            decider,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Handle one delivery and settle it with the broker.
    pub async fn process(
        &self,
        delivery: Box<dyn Delivery>,
    ) -> Result<DeliveryOutcome, TransportError> {
        let delivery_id = delivery.id();
        let attempt = delivery.attempt();

        let result = self
            .handler
            .handle_dyn(delivery.content_type(), delivery.body())
            .await;

        let err = match result {
            Ok(()) => {
                delivery.ack().await?;
                debug!(%delivery_id, attempt, "delivery acked");
                return Ok(DeliveryOutcome::Acked);
            }
            Err(err) => err,
        };

        if let PaymentError::Malformed(cause) = &err {
            warn!(%delivery_id, error = %cause, "malformed message discarded");
            delivery.nack(Nack::Discard).await?;
            return Ok(DeliveryOutcome::Discarded);
        }

        match self.decider.decide(attempt, &err) {
            Decision::Retry { delay, reason } => {
                warn!(%delivery_id, attempt, ?delay, %reason, "delivery failed, requeued");
                delivery.nack(Nack::Requeue { delay }).await?;
                Ok(DeliveryOutcome::Requeued { delay })
            }
            Decision::DeadLetter { reason } => {
                error!(%delivery_id, attempt, %reason, "delivery dead-lettered");
                delivery.nack(Nack::DeadLetter { reason }).await?;
                Ok(DeliveryOutcome::DeadLettered)
            }
        }
    }

    /// Consume until shutdown is requested or the connection closes.
    ///
    /// The handler in progress when shutdown arrives runs to completion and
    /// its delivery is settled before returning.
    pub async fn run(
        &self,
        channel: &dyn QueueChannel,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        loop {
            if *shutdown_rx.borrow() {
                return Ok(());
            }

            // receive は待つ可能性があるので select で shutdown と競合させる
            let delivery = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // sender dropped
                        return Ok(());
                    }
                    continue;
                }
                delivery = channel.receive(&self.queue) => delivery?,
            };

            let Some(delivery) = delivery else {
                debug!(queue = %self.queue, "connection closed, consumer stopping");
                return Ok(());
            };

            match self.process(delivery).await {
                Ok(_) => {}
                // The broker already took the delivery back (channel or
                // connection closed); it will be redelivered.
                Err(TransportError::DeliveryGone(id)) => {
                    warn!(delivery_id = %id, "delivery settled after it was returned to the queue");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
