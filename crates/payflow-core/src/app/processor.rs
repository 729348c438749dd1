//! PaymentProcessor - 処理指示のハンドラ
//!
//! 指示 1 件につき `RecordStore::settle_with` を 1 回呼ぶだけ。
//! 配送をまたいだ状態は持たないので、何台並べてもよい。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{PaymentError, ProcessingInstruction, Settler};
use crate::ports::RecordStore;
use crate::typed::Handler;

pub struct PaymentProcessor {
    store: Arc<dyn RecordStore>,
    settler: Arc<dyn Settler>,
}

impl PaymentProcessor {
    pub fn new(store: Arc<dyn RecordStore>, settler: Arc<dyn Settler>) -> Self {
        Self { store, settler }
    }
}

#[async_trait]
impl Handler<ProcessingInstruction> for PaymentProcessor {
    /// Already-terminal payments are a successful no-op, so duplicates ack.
    async fn handle(&self, instruction: ProcessingInstruction) -> Result<(), PaymentError> {
        let payment = self
            .store
            .settle_with(instruction.payment_id, self.settler.as_ref())
            .await?;
        info!(
            payment_id = %payment.id,
            status = %payment.status,
            "payment processed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ApproveAll, Currency, NewPayment, PaymentId, PaymentStatus};
    use crate::impls::InMemoryRecordStore;
    use rust_decimal_macros::dec;

    fn processor(store: Arc<InMemoryRecordStore>) -> PaymentProcessor {
        PaymentProcessor::new(store, Arc::new(ApproveAll))
    }

    #[tokio::test]
    async fn settles_pending_and_tolerates_duplicates() {
        let store = Arc::new(InMemoryRecordStore::new());
        let created = store
            .create(NewPayment::new(dec!(100.00), Currency::Usd, "order-42"))
            .await
            .unwrap();
        let p = processor(store.clone());

        p.handle(ProcessingInstruction::new(created.id)).await.unwrap();
        p.handle(ProcessingInstruction::new(created.id)).await.unwrap();

        let stored = store.get_by_id(created.id).await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
    }

    #[tokio::test]
    async fn unknown_payment_fails_the_delivery() {
        let p = processor(Arc::new(InMemoryRecordStore::new()));
        let err = p
            .handle(ProcessingInstruction::new(PaymentId::generate()))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
        assert!(err.is_retryable());
    }
}
