use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal_macros::dec;

use payflow_core::app::{DeliveryOutcome, Service, ServiceBuilder};
use payflow_core::config::PayflowConfig;
use payflow_core::domain::{
    Currency, DefaultDecider, DeliveryId, NewPayment, OutboxEntry, Payment, PaymentError,
    PaymentId, PaymentStatus, ProcessingInstruction, RetryPolicy, Settler, TerminalStatus,
};
use payflow_core::impls::{InMemoryBroker, InMemoryRecordStore};
use payflow_core::ports::{
    Connection, IdGenerator, OutboundMessage, QueueChannel, RecordStore, StatusCounts,
    SystemClock,
};
use payflow_core::typed::{self, CONTENT_TYPE_JSON};

// ----------------------------------------------------------------------------
// helpers
// ----------------------------------------------------------------------------

fn fast_config() -> PayflowConfig {
    PayflowConfig {
        workers: 2,
        retry_base_delay_ms: 0,
        retry_max_delay_ms: 0,
        max_attempts: 5,
        outbox_interval_ms: 10,
        outbox_grace_ms: 0,
        ..PayflowConfig::default()
    }
}

fn service(
    config: PayflowConfig,
    store: Arc<dyn RecordStore>,
    broker: Arc<InMemoryBroker>,
) -> Service {
    ServiceBuilder::new(config)
        .store(store)
        .connection(broker)
        .build()
        .unwrap()
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for: {what}");
}

async fn status_of(store: &dyn RecordStore, id: PaymentId) -> PaymentStatus {
    store.get_by_id(id).await.unwrap().status
}

fn order(reference: &str) -> NewPayment {
    NewPayment::new(dec!(100.00), Currency::Usd, reference)
}

/// Hands out a preset id first, fresh ones afterwards.
struct PresetIds {
    next: Mutex<Option<PaymentId>>,
}

impl IdGenerator for PresetIds {
    fn generate_payment_id(&self) -> PaymentId {
        self.next
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(PaymentId::generate)
    }

    fn generate_delivery_id(&self) -> DeliveryId {
        DeliveryId::generate()
    }
}

/// Store wrapper whose `settle_with` fails with a storage error for the
/// first `failures` calls on the listed ids (all ids when empty).
struct FlakyStore {
    inner: InMemoryRecordStore,
    failures: AtomicU32,
    only: Mutex<HashSet<PaymentId>>,
    settle_calls: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            failures: AtomicU32::new(failures),
            only: Mutex::new(HashSet::new()),
            settle_calls: AtomicUsize::new(0),
        }
    }

    fn target(&self, id: PaymentId) {
        self.only.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create(&self, request: NewPayment) -> Result<Payment, PaymentError> {
        self.inner.create(request).await
    }

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Payment, PaymentError> {
        self.inner.get_by_reference(reference).await
    }

    async fn settle_with(
        &self,
        id: PaymentId,
        settler: &dyn Settler,
    ) -> Result<Payment, PaymentError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        let targeted = {
            let only = self.only.lock().unwrap();
            only.is_empty() || only.contains(&id)
        };
        if targeted
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(PaymentError::Storage("connection reset".into()));
        }
        self.inner.settle_with(id, settler).await
    }

    async fn count_by_status(&self) -> Result<StatusCounts, PaymentError> {
        self.inner.count_by_status().await
    }

    async fn pull_outbox(
        &self,
        limit: usize,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, PaymentError> {
        self.inner.pull_outbox(limit, created_before).await
    }

    async fn ack_outbox(&self, id: PaymentId) -> Result<(), PaymentError> {
        self.inner.ack_outbox(id).await
    }

    async fn fail_outbox(&self, id: PaymentId, error: &str) -> Result<(), PaymentError> {
        self.inner.fail_outbox(id, error).await
    }
}

// ----------------------------------------------------------------------------
// scenarios
// ----------------------------------------------------------------------------

#[tokio::test]
async fn create_publish_consume_settles_payment() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker);
    let workers = svc.start_processor().await.unwrap();

    let created = svc.intake().submit(order("order-42")).await.unwrap();
    assert_eq!(created.status, PaymentStatus::Pending);

    let (s, id) = (store.as_ref(), created.id);
    eventually("payment settles", || async move {
        status_of(s, id).await == PaymentStatus::Success
    })
    .await;
    workers.shutdown_and_join().await;

    let settled = store.get_by_id(created.id).await.unwrap();
    assert_eq!(settled.amount, dec!(100.00));
    assert_eq!(settled.currency, Currency::Usd);
    assert_eq!(settled.reference, "order-42");
    assert_eq!(settled.created_at, created.created_at);

    let report = svc.status().await.unwrap();
    assert!(report.is_settled());
    assert_eq!(report.payments.success, 1);
    assert_eq!(report.queue.stats.acked, 1);
}

#[tokio::test]
async fn duplicate_reference_yields_one_record_and_one_conflict() {
    let store = Arc::new(InMemoryRecordStore::new());
    let svc = service(fast_config(), store.clone(), Arc::new(InMemoryBroker::new()));
    let intake = svc.intake();

    intake.submit(order("order-42")).await.unwrap();
    let err = intake.submit(order("order-42")).await.unwrap_err();

    assert!(matches!(err, PaymentError::Conflict { .. }));
    assert_eq!(store.count_by_status().await.unwrap().total(), 1);
}

#[tokio::test]
async fn racing_creations_with_one_reference_admit_exactly_one() {
    let store = Arc::new(InMemoryRecordStore::new());

    let mut joins = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        joins.push(tokio::spawn(async move { store.create(order("same")).await }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for j in joins {
        match j.await.unwrap() {
            Ok(_) => ok += 1,
            Err(PaymentError::Conflict { .. }) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, conflicts), (1, 15));
    assert_eq!(store.count_by_status().await.unwrap().total(), 1);
}

#[tokio::test]
async fn instruction_before_record_is_retried_until_the_record_exists() {
    let future_id = PaymentId::generate();
    let store = Arc::new(InMemoryRecordStore::with_clock_and_ids(
        Arc::new(SystemClock),
        Arc::new(PresetIds {
            next: Mutex::new(Some(future_id)),
        }),
    ));
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker.clone());
    let consumer = svc.consumer();

    let ch = broker.open_channel().await.unwrap();
    svc.topology().declare(ch.as_ref()).await.unwrap();
    typed::publish(
        ch.as_ref(),
        svc.topology().queue_name(),
        &ProcessingInstruction::new(future_id),
    )
    .await
    .unwrap();

    let first = ch.receive(svc.topology().queue_name()).await.unwrap().unwrap();
    assert_eq!(
        consumer.process(first).await.unwrap(),
        DeliveryOutcome::Requeued {
            delay: Duration::ZERO
        }
    );

    let created = store.create(order("late-row")).await.unwrap();
    assert_eq!(created.id, future_id);

    let second = ch.receive(svc.topology().queue_name()).await.unwrap().unwrap();
    assert_eq!(second.attempt(), 2);
    assert_eq!(
        consumer.process(second).await.unwrap(),
        DeliveryOutcome::Acked
    );
    assert_eq!(
        status_of(store.as_ref(), future_id).await,
        PaymentStatus::Success
    );
}

#[tokio::test]
async fn concurrent_settles_change_status_once() {
    let store = Arc::new(InMemoryRecordStore::new());
    let created = store.create(order("hot")).await.unwrap();

    let id = created.id;
    let decisions = Arc::new(AtomicUsize::new(0));
    let mut joins = Vec::new();
    for _ in 0..32 {
        let store = store.clone();
        let decisions = decisions.clone();
        joins.push(tokio::spawn(async move {
            let settler = move |_: &Payment| {
                decisions.fetch_add(1, Ordering::SeqCst);
                TerminalStatus::Success
            };
            store.settle_with(id, &settler).await
        }));
    }

    let mut results = Vec::new();
    for j in joins {
        results.push(j.await.unwrap().unwrap());
    }

    assert_eq!(decisions.load(Ordering::SeqCst), 1);
    let first = &results[0];
    assert!(results.iter().all(|p| p == first));
    assert_eq!(first.status, PaymentStatus::Success);
}

#[tokio::test]
async fn terminal_payments_are_immutable() {
    let store = InMemoryRecordStore::new();
    let created = store.create(order("final")).await.unwrap();
    let settled = store.settle(created.id).await.unwrap();

    let decline = |_: &Payment| TerminalStatus::Failed;
    for _ in 0..3 {
        let again = store.settle_with(created.id, &decline).await.unwrap();
        assert_eq!(again, settled);
    }
}

#[tokio::test]
async fn malformed_messages_are_dropped_and_consumption_continues() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker.clone());
    let workers = svc.start_processor().await.unwrap();

    let ch = broker.open_channel().await.unwrap();
    let queue = svc.topology().queue_name().to_string();
    for body in [
        b"garbage".as_slice(),
        br#"{"payment_id":42}"#.as_slice(),
        b"".as_slice(),
    ] {
        ch.publish(
            &queue,
            OutboundMessage {
                body: body.to_vec(),
                content_type: CONTENT_TYPE_JSON.into(),
                persistent: true,
            },
        )
        .await
        .unwrap();
    }
    let created = svc.intake().submit(order("after-junk")).await.unwrap();

    let (s, id) = (store.as_ref(), created.id);
    eventually("valid payment settles", || async move {
        status_of(s, id).await == PaymentStatus::Success
    })
    .await;
    let (c, q) = (ch.as_ref(), queue.as_str());
    eventually("junk discarded", || async move {
        c.stats(q).await.unwrap().discarded == 3
    })
    .await;
    workers.shutdown_and_join().await;

    let stats = ch.stats(&queue).await.unwrap();
    assert_eq!(stats.outstanding(), 0);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(stats.acked, 1);
}

#[tokio::test]
async fn transient_failures_converge_to_one_success() {
    let store = Arc::new(FlakyStore::new(3));
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker.clone());
    let workers = svc.start_processor().await.unwrap();

    let created = svc.intake().submit(order("flaky")).await.unwrap();
    let (s, id) = (store.as_ref(), created.id);
    eventually("payment settles after retries", || async move {
        status_of(s, id).await == PaymentStatus::Success
    })
    .await;
    workers.shutdown_and_join().await;

    assert_eq!(store.settle_calls.load(Ordering::SeqCst), 4);
    let report = svc.status().await.unwrap();
    assert_eq!(report.queue.stats.acked, 1);
    assert_eq!(report.queue.stats.dead_lettered, 0);
}

#[tokio::test]
async fn duplicate_deliveries_are_harmless() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker.clone());

    let created = svc.intake().submit(order("dup")).await.unwrap();
    let ch = broker.open_channel().await.unwrap();
    for _ in 0..4 {
        typed::publish(
            ch.as_ref(),
            svc.topology().queue_name(),
            &ProcessingInstruction::new(created.id),
        )
        .await
        .unwrap();
    }

    let workers = svc.start_processor().await.unwrap();
    let (c, q) = (ch.as_ref(), svc.topology().queue_name());
    eventually("all copies acked", || async move {
        c.stats(q).await.unwrap().acked == 5
    })
    .await;
    workers.shutdown_and_join().await;

    let counts = store.count_by_status().await.unwrap();
    assert_eq!(counts.success, 1);
    assert_eq!(counts.total(), 1);
}

#[tokio::test]
async fn exhausted_instructions_are_dead_lettered() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let config = PayflowConfig {
        max_attempts: 3,
        ..fast_config()
    };
    let svc = service(config, store, broker.clone());
    let workers = svc.start_processor().await.unwrap();

    let ch = broker.open_channel().await.unwrap();
    typed::publish(
        ch.as_ref(),
        svc.topology().queue_name(),
        &ProcessingInstruction::new(PaymentId::generate()),
    )
    .await
    .unwrap();

    let (c, q) = (ch.as_ref(), svc.topology().queue_name());
    eventually("instruction dead-lettered", || async move {
        c.stats(q).await.unwrap().dead_lettered == 1
    })
    .await;
    workers.shutdown_and_join().await;

    let report = svc.status().await.unwrap();
    assert_eq!(report.queue.stats.outstanding(), 0);
    assert_eq!(report.dead_letter.unwrap().stats.ready, 1);
}

#[tokio::test]
async fn payments_created_while_broker_is_down_are_relayed() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker.clone());

    broker.close().await;
    let created = svc.intake().submit(order("offline")).await.unwrap();
    assert_eq!(
        status_of(store.as_ref(), created.id).await,
        PaymentStatus::Pending
    );

    broker.reopen();
    let publisher = svc.start_publisher();
    let workers = svc.start_processor().await.unwrap();

    let (s, id) = (store.as_ref(), created.id);
    eventually("relayed payment settles", || async move {
        status_of(s, id).await == PaymentStatus::Success
    })
    .await;
    workers.shutdown_and_join().await;
    publisher.shutdown_and_join().await;

    let outbox = store.pull_outbox(10, Utc::now()).await.unwrap();
    assert!(outbox.is_empty());
}

#[tokio::test]
async fn processor_resumes_after_broker_restart() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(fast_config(), store.clone(), broker.clone());
    let workers = svc.start_processor().await.unwrap();

    broker.close().await;
    broker.reopen();

    let created = svc.intake().submit(order("after-restart")).await.unwrap();
    let (s, id) = (store.as_ref(), created.id);
    eventually("payment settles after restart", || async move {
        status_of(s, id).await == PaymentStatus::Success
    })
    .await;
    workers.shutdown_and_join().await;

    let report = svc.status().await.unwrap();
    assert_eq!(report.queue.stats.outstanding(), 0);
    assert_eq!(report.queue.stats.acked, 1);
}

#[tokio::test]
async fn dropped_consumer_channel_releases_its_delivery() {
    let broker = Arc::new(InMemoryBroker::new());
    let svc = service(
        fast_config(),
        Arc::new(InMemoryRecordStore::new()),
        broker.clone(),
    );
    let queue = svc.topology().queue_name();
    let created = svc.intake().submit(order("crash")).await.unwrap();

    {
        let doomed: Box<dyn QueueChannel> = broker.open_channel().await.unwrap();
        let delivery = doomed.receive(queue).await.unwrap().unwrap();
        assert_eq!(delivery.attempt(), 1);
        // consumer dies before ack
    }

    let survivor = broker.open_channel().await.unwrap();
    let again = survivor.receive(queue).await.unwrap().unwrap();
    assert_eq!(again.attempt(), 2);
    let instruction: ProcessingInstruction =
        serde_json::from_slice(again.body()).unwrap();
    assert_eq!(instruction.payment_id, created.id);
}

#[tokio::test]
async fn waiting_retry_does_not_stall_the_consumer() {
    let store = Arc::new(FlakyStore::new(1));
    let broker = Arc::new(InMemoryBroker::new());
    let config = PayflowConfig {
        workers: 1,
        retry_base_delay_ms: 60_000,
        retry_max_delay_ms: 60_000,
        ..fast_config()
    };
    let svc = service(config, store.clone(), broker.clone());

    let stuck = svc.intake().submit(order("stuck")).await.unwrap();
    store.target(stuck.id);
    let workers = svc.start_processor().await.unwrap();
    let fine = svc.intake().submit(order("fine")).await.unwrap();

    let (s, id) = (store.as_ref(), fine.id);
    eventually("second payment settles while first waits", || async move {
        status_of(s, id).await == PaymentStatus::Success
    })
    .await;
    assert_eq!(
        status_of(store.as_ref(), stuck.id).await,
        PaymentStatus::Pending
    );
    let stats = svc.status().await.unwrap().queue.stats;
    assert_eq!(stats.scheduled, 1);

    workers.shutdown_and_join().await;
}

#[tokio::test]
async fn custom_decider_and_settler_are_wired_through() {
    let store = Arc::new(InMemoryRecordStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let svc = ServiceBuilder::new(fast_config())
        .store(store.clone())
        .connection(broker)
        .settler(Arc::new(|p: &Payment| {
            if p.amount > dec!(1000) {
                TerminalStatus::Failed
            } else {
                TerminalStatus::Success
            }
        }))
        .decider(Arc::new(DefaultDecider::new(
            RetryPolicy::fixed(Duration::ZERO),
            Some(1),
        )))
        .build()
        .unwrap();
    let workers = svc.start_processor().await.unwrap();

    let small = svc.intake().submit(order("small")).await.unwrap();
    let big = svc
        .intake()
        .submit(NewPayment::new(dec!(5000), Currency::Etb, "big"))
        .await
        .unwrap();

    let s = store.as_ref();
    eventually("both settle", || async move {
        s.count_by_status().await.unwrap().pending == 0
    })
    .await;
    workers.shutdown_and_join().await;

    assert_eq!(status_of(store.as_ref(), small.id).await, PaymentStatus::Success);
    assert_eq!(status_of(store.as_ref(), big.id).await, PaymentStatus::Failed);
}
