//! InMemoryRecordStore - 開発・テスト用の正本
//!
//! # 実装詳細
//! - テーブル（rows / reference 索引 / outbox）は 1 つの RwLock で守る。await を跨いで保持しない
//! - 各行は `Arc<tokio::sync::Mutex<Payment>>`。settle は行ロックの中で read-modify-write
//! - 行ロックは id ごとなので、別の id の settle は互いを待たない
//! - 未送信 outbox は (created_at, id) 順の索引で引く。送信済みは走査しない

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{NewPayment, OutboxEntry, Payment, PaymentError, PaymentId, PaymentStatus, Settler};
use crate::ports::{Clock, IdGenerator, RecordStore, StatusCounts, SystemClock, UlidGenerator};

#[derive(Default)]
struct Tables {
    rows: HashMap<PaymentId, Arc<Mutex<Payment>>>,
    by_reference: HashMap<String, PaymentId>,
    outbox: HashMap<PaymentId, OutboxEntry>,

    /// Unpublished outbox entries, oldest first.
    unpublished: BTreeSet<(DateTime<Utc>, PaymentId)>,
}

pub struct InMemoryRecordStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::with_clock_and_ids(Arc::new(SystemClock), Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_clock_and_ids(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
            ids,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn row(&self, id: PaymentId) -> Result<Arc<Mutex<Payment>>, PaymentError> {
        self.read()
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| PaymentError::not_found(id))
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, request: NewPayment) -> Result<Payment, PaymentError> {
        let mut tables = self.write();
        if tables.by_reference.contains_key(&request.reference) {
            return Err(PaymentError::Conflict {
                reference: request.reference,
            });
        }

        let id = self.ids.generate_payment_id();
        if tables.rows.contains_key(&id) {
            return Err(PaymentError::Storage(format!("duplicate primary key {id}")));
        }
        let now = self.clock.now();
        let payment = Payment::pending(id, request, now);

        tables.by_reference.insert(payment.reference.clone(), id);
        tables.outbox.insert(id, OutboxEntry::new(id, now));
        tables.unpublished.insert((now, id));
        tables.rows.insert(id, Arc::new(Mutex::new(payment.clone())));

        debug!(payment_id = %id, reference = %payment.reference, "payment inserted");
        Ok(payment)
    }

    async fn get_by_id(&self, id: PaymentId) -> Result<Payment, PaymentError> {
        let row = self.row(id)?;
        let payment = row.lock().await.clone();
        Ok(payment)
    }

    async fn get_by_reference(&self, reference: &str) -> Result<Payment, PaymentError> {
        let row = {
            let tables = self.read();
            tables
                .by_reference
                .get(reference)
                .and_then(|id| tables.rows.get(id))
                .cloned()
                .ok_or_else(|| PaymentError::reference_not_found(reference))?
        };
        let payment = row.lock().await.clone();
        Ok(payment)
    }

    async fn settle_with(
        &self,
        id: PaymentId,
        settler: &dyn Settler,
    ) -> Result<Payment, PaymentError> {
        let row = self.row(id)?;
        let mut payment = row.lock().await;

        if payment.is_terminal() {
            debug!(payment_id = %id, status = %payment.status, "already settled, no-op");
            return Ok(payment.clone());
        }

        let outcome = settler.decide(&payment);
        payment.settle(outcome, self.clock.now());
        debug!(payment_id = %id, status = %payment.status, "payment settled");
        Ok(payment.clone())
    }

    async fn count_by_status(&self) -> Result<StatusCounts, PaymentError> {
        let rows: Vec<_> = self.read().rows.values().cloned().collect();

        let mut counts = StatusCounts::default();
        for row in rows {
            match row.lock().await.status {
                PaymentStatus::Pending => counts.pending += 1,
                PaymentStatus::Success => counts.success += 1,
                PaymentStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn pull_outbox(
        &self,
        limit: usize,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, PaymentError> {
        let tables = self.read();
        let entries = tables
            .unpublished
            .iter()
            .take_while(|(created_at, _)| *created_at <= created_before)
            .filter_map(|(_, id)| tables.outbox.get(id).cloned())
            .take(limit)
            .collect();
        Ok(entries)
    }

    async fn ack_outbox(&self, id: PaymentId) -> Result<(), PaymentError> {
        let now = self.clock.now();
        let mut tables = self.write();
        let entry = tables
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found(id))?;
        entry.mark_published(now);
        let key = (entry.created_at, id);
        tables.unpublished.remove(&key);
        Ok(())
    }

    async fn fail_outbox(&self, id: PaymentId, error: &str) -> Result<(), PaymentError> {
        let mut tables = self.write();
        let entry = tables
            .outbox
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found(id))?;
        entry.record_failure(error.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, TerminalStatus};
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn store_at(clock: Arc<FixedClock>) -> InMemoryRecordStore {
        InMemoryRecordStore::with_clock_and_ids(
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
        )
    }

    fn order(reference: &str) -> NewPayment {
        NewPayment::new(dec!(100.00), Currency::Usd, reference)
    }

    #[tokio::test]
    async fn create_then_lookup() {
        let store = InMemoryRecordStore::new();
        let created = store.create(order("order-42")).await.unwrap();

        assert_eq!(created.status, PaymentStatus::Pending);
        assert_eq!(store.get_by_id(created.id).await.unwrap(), created);
        assert_eq!(store.get_by_reference("order-42").await.unwrap(), created);
    }

    #[tokio::test]
    async fn duplicate_reference_is_conflict() {
        let store = InMemoryRecordStore::new();
        store.create(order("order-42")).await.unwrap();

        let err = store.create(order("order-42")).await.unwrap_err();
        assert!(matches!(err, PaymentError::Conflict { reference } if reference == "order-42"));
        assert_eq!(store.count_by_status().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = InMemoryRecordStore::new();
        let id = PaymentId::generate();

        assert!(matches!(store.get_by_id(id).await, Err(PaymentError::NotFound(_))));
        assert!(matches!(store.settle(id).await, Err(PaymentError::NotFound(_))));
        assert!(matches!(
            store.get_by_reference("missing").await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn settle_is_idempotent() {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = store_at(clock.clone());
        let created = store.create(order("order-42")).await.unwrap();

        clock.advance(Duration::seconds(1));
        let first = store.settle(created.id).await.unwrap();
        assert_eq!(first.status, PaymentStatus::Success);
        assert_eq!(first.updated_at, t0() + Duration::seconds(1));
        assert_eq!(first.created_at, t0());

        clock.advance(Duration::seconds(1));
        let second = store.settle(created.id).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn settler_runs_only_while_pending() {
        let store = InMemoryRecordStore::new();
        let created = store.create(order("order-42")).await.unwrap();

        let calls = AtomicUsize::new(0);
        let decline = |_: &Payment| {
            calls.fetch_add(1, Ordering::SeqCst);
            TerminalStatus::Failed
        };

        let settled = store.settle_with(created.id, &decline).await.unwrap();
        assert_eq!(settled.status, PaymentStatus::Failed);

        let again = store.settle(created.id).await.unwrap();
        assert_eq!(again.status, PaymentStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn creation_writes_outbox_entry() {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = store_at(clock.clone());
        let a = store.create(order("a")).await.unwrap();
        clock.advance(Duration::seconds(1));
        let b = store.create(order("b")).await.unwrap();

        let pending = store.pull_outbox(10, t0() + Duration::seconds(1)).await.unwrap();
        let ids: Vec<_> = pending.iter().map(|e| e.payment_id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        // grace window excludes the newer entry
        let older = store.pull_outbox(10, t0()).await.unwrap();
        assert_eq!(older.len(), 1);

        store.fail_outbox(a.id, "broker down").await.unwrap();
        store.ack_outbox(b.id).await.unwrap();
        store.ack_outbox(b.id).await.unwrap();

        let left = store.pull_outbox(10, t0() + Duration::seconds(5)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payment_id, a.id);
        assert_eq!(left[0].attempts, 1);
        assert_eq!(left[0].last_error.as_deref(), Some("broker down"));
    }

    #[tokio::test]
    async fn acked_entries_leave_the_pull_index() {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = store_at(clock.clone());
        let mut created = Vec::new();
        for r in ["a", "b", "c", "d"] {
            created.push(store.create(order(r)).await.unwrap().id);
            clock.advance(Duration::seconds(1));
        }
        for id in &created[..3] {
            store.ack_outbox(*id).await.unwrap();
        }

        assert_eq!(store.read().unpublished.len(), 1);
        let left = store.pull_outbox(1, t0() + Duration::seconds(10)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].payment_id, created[3]);
    }

    #[tokio::test]
    async fn counts_by_status() {
        let store = InMemoryRecordStore::new();
        let a = store.create(order("a")).await.unwrap();
        store.create(order("b")).await.unwrap();
        store.settle(a.id).await.unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                pending: 1,
                success: 1,
                failed: 0
            }
        );
    }
}
