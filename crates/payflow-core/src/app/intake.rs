//! PaymentIntake - 支払い作成の入口（HTTP などの外側から呼ばれる）
//!
//! # フロー
//! 1. NewPayment::validate()
//! 2. get_by_reference() で事前チェック（一意性の保証は create 側）
//! 3. create()（Pending レコード + outbox エントリ）
//! 4. 処理指示を publish（best-effort。失敗してもエラーにしない）
//! 5. publish 成功なら ack_outbox()。失敗分は PublisherLoop が拾う

use std::sync::Arc;

use tracing::{info, warn};

use super::publisher::InstructionPublisher;
use crate::domain::{NewPayment, Payment, PaymentError, PaymentId, ProcessingInstruction};
use crate::ports::RecordStore;

#[derive(Clone)]
pub struct PaymentIntake {
    store: Arc<dyn RecordStore>,
    publisher: Arc<InstructionPublisher>,
}

impl PaymentIntake {
    pub fn new(store: Arc<dyn RecordStore>, publisher: Arc<InstructionPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Record a new payment and ask for it to be processed.
    ///
    /// Returns the Pending payment even when the publish fails; the payment
    /// is durable and the outbox relay will publish it later.
    pub async fn submit(&self, request: NewPayment) -> Result<Payment, PaymentError> {
        request.validate()?;

        match self.store.get_by_reference(&request.reference).await {
            Ok(existing) => {
                return Err(PaymentError::Conflict {
                    reference: existing.reference,
                });
            }
            Err(PaymentError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let payment = self.store.create(request).await?;
        info!(
            payment_id = %payment.id,
            reference = %payment.reference,
            amount = %payment.amount,
            currency = %payment.currency,
            "payment created"
        );

        match self
            .publisher
            .publish(&ProcessingInstruction::new(payment.id))
            .await
        {
            Ok(()) => {
                if let Err(e) = self.store.ack_outbox(payment.id).await {
                    warn!(payment_id = %payment.id, error = %e, "outbox ack failed, instruction may be published twice");
                }
            }
            Err(e) => {
                warn!(payment_id = %payment.id, error = %e, "publish failed, left to outbox relay");
            }
        }

        Ok(payment)
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        self.store.get_by_id(id).await
    }

    pub async fn get_by_reference(&self, reference: &str) -> Result<Payment, PaymentError> {
        self.store.get_by_reference(reference).await
    }
}
