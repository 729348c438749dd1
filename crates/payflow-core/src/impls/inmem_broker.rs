//! In-memory broker implementing the queue channel ports.
//!
//! Mirrors the AMQP behaviour the pipeline relies on:
//! - messages stay in the queue until acked
//! - a dropped channel returns its unacked deliveries to their queues
//! - `Nack::Requeue { delay }` parks the message in a scheduled heap; other
//!   messages keep flowing
//! - `Nack::DeadLetter` moves the message to the queue's dead-letter queue
//! - closing the connection requeues everything in flight and wakes receivers
//!
//! The state mutex is a `std::sync::Mutex` so `Drop` can take it; it is never
//! held across an `.await`.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::DeliveryId;
use crate::ports::{
    Connection, Delivery, IdGenerator, Nack, OutboundMessage, QueueChannel, QueueSpec,
    QueueStats, SystemClock, TransportError, UlidGenerator,
};

/// A message as stored by the broker.
#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    content_type: String,

    /// Deliveries so far.
    deliveries: u32,
}

/// Scheduled redelivery.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    message: StoredMessage,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct InFlight {
    channel: u64,
    message: StoredMessage,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    scheduled: BinaryHeap<Scheduled>,
    in_flight: HashMap<DeliveryId, InFlight>,
    acked: u64,
    discarded: u64,
    dead_lettered: u64,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            scheduled: BinaryHeap::new(),
            in_flight: HashMap::new(),
            acked: 0,
            discarded: 0,
            dead_lettered: 0,
        }
    }

    /// Move messages from scheduled to ready if their time has come.
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.due > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back(entry.message);
            }
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.scheduled.peek().map(|entry| entry.due)
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            ready: self.ready.len() as u64,
            scheduled: self.scheduled.len() as u64,
            in_flight: self.in_flight.len() as u64,
            acked: self.acked,
            discarded: self.discarded,
            dead_lettered: self.dead_lettered,
        }
    }
}

struct BrokerState {
    open: bool,

    /// Bumped on every close; channels from an older epoch are dead.
    epoch: u64,
    queues: HashMap<String, QueueState>,
    seq: u64,
}

impl BrokerState {
    fn queue_mut(&mut self, name: &str) -> Result<&mut QueueState, TransportError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| TransportError::UnknownQueue(name.to_string()))
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Return every unsettled delivery of `channel` (all channels when
    /// `None`) to the front of its queue.
    fn requeue_in_flight(&mut self, channel: Option<u64>) -> usize {
        let mut returned = 0;
        for queue in self.queues.values_mut() {
            let ids: Vec<DeliveryId> = queue
                .in_flight
                .iter()
                .filter(|(_, f)| channel.is_none_or(|c| f.channel == c))
                .map(|(id, _)| *id)
                .collect();
            // newest first so push_front restores delivery order
            let mut ids = ids;
            ids.sort_unstable_by(|a, b| b.cmp(a));
            for id in ids {
                if let Some(flight) = queue.in_flight.remove(&id) {
                    queue.ready.push_front(flight.message);
                    returned += 1;
                }
            }
        }
        returned
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    next_channel: AtomicU64,
    ids: Arc<dyn IdGenerator>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(
        &self,
        queue: &str,
        id: DeliveryId,
        nack: Option<Nack>,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        let seq = state.next_seq();
        let q = state.queue_mut(queue)?;
        let flight = q
            .in_flight
            .remove(&id)
            .ok_or(TransportError::DeliveryGone(id))?;

        let mut dead_letter_target = None;
        match nack {
            None => q.acked += 1,
            Some(Nack::Requeue { delay }) if delay.is_zero() => {
                q.ready.push_back(flight.message);
            }
            Some(Nack::Requeue { delay }) => {
                q.scheduled.push(Scheduled {
                    due: Instant::now() + delay,
                    seq,
                    message: flight.message,
                });
            }
            Some(Nack::Discard) => q.discarded += 1,
            Some(Nack::DeadLetter { reason }) => {
                q.dead_lettered += 1;
                match q.spec.dead_letter.clone() {
                    Some(dlq) => dead_letter_target = Some((dlq, flight.message, reason)),
                    None => warn!(queue, delivery_id = %id, %reason, "no dead-letter queue, message dropped"),
                }
            }
        }

        if let Some((dlq, mut message, reason)) = dead_letter_target {
            message.deliveries = 0;
            match state.queues.get_mut(&dlq) {
                Some(target) => {
                    debug!(queue, dead_letter_queue = %dlq, delivery_id = %id, %reason, "message dead-lettered");
                    target.ready.push_back(message);
                }
                None => {
                    warn!(queue, dead_letter_queue = %dlq, "dead-letter queue not declared, message dropped")
                }
            }
        }

        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }
}

enum Take {
    Delivered(BrokerDelivery),
    Closed,
    Empty(Option<Instant>),
}

/// In-memory broker connection.
///
/// Queues survive `close()`/`reopen()`, the way durable queues survive a
/// broker restart.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_ids(Arc::new(UlidGenerator::new(SystemClock)))
    }

    /// Delivery ids come from `ids`.
    pub fn with_ids(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    open: true,
                    epoch: 0,
                    queues: HashMap::new(),
                    seq: 0,
                }),
                notify: Notify::new(),
                next_channel: AtomicU64::new(1),
                ids,
            }),
        }
    }

    /// Bring a closed broker back. Channels opened before the close stay dead.
    pub fn reopen(&self) {
        self.shared.lock().open = true;
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for InMemoryBroker {
    async fn open_channel(&self) -> Result<Box<dyn QueueChannel>, TransportError> {
        let state = self.shared.lock();
        if !state.open {
            return Err(TransportError::Closed);
        }
        let id = self.shared.next_channel.fetch_add(1, Ordering::Relaxed);
        debug!(channel = id, "channel opened");
        Ok(Box::new(BrokerChannel {
            id,
            epoch: state.epoch,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) {
        let returned = {
            let mut state = self.shared.lock();
            if !state.open {
                return;
            }
            state.open = false;
            state.epoch += 1;
            state.requeue_in_flight(None)
        };
        debug!(returned, "broker connection closed");
        self.shared.notify.notify_waiters();
    }

    fn is_open(&self) -> bool {
        self.shared.lock().open
    }
}

/// Channel handle. Dropping it returns unsettled deliveries to their queues.
pub struct BrokerChannel {
    id: u64,
    epoch: u64,
    shared: Arc<Shared>,
}

impl BrokerChannel {
    fn live<'a>(
        &self,
        state: &'a mut MutexGuard<'_, BrokerState>,
    ) -> Result<&'a mut BrokerState, TransportError> {
        if !state.open || state.epoch != self.epoch {
            return Err(TransportError::Closed);
        }
        Ok(&mut **state)
    }

    fn try_take(&self, queue: &str) -> Result<Take, TransportError> {
        let mut guard = self.shared.lock();
        if !guard.open || guard.epoch != self.epoch {
            return Ok(Take::Closed);
        }
        let q = guard.queue_mut(queue)?;
        q.promote_scheduled(Instant::now());

        let Some(mut message) = q.ready.pop_front() else {
            return Ok(Take::Empty(q.next_due()));
        };
        message.deliveries += 1;

        let id = self.shared.ids.generate_delivery_id();
        let delivery = BrokerDelivery {
            id,
            queue: queue.to_string(),
            body: message.body.clone(),
            content_type: message.content_type.clone(),
            attempt: message.deliveries,
            shared: Arc::clone(&self.shared),
        };
        q.in_flight.insert(
            id,
            InFlight {
                channel: self.id,
                message,
            },
        );
        Ok(Take::Delivered(delivery))
    }
}

#[async_trait]
impl QueueChannel for BrokerChannel {
    async fn declare(&self, spec: &QueueSpec) -> Result<(), TransportError> {
        let mut guard = self.shared.lock();
        let state = self.live(&mut guard)?;
        state
            .queues
            .entry(spec.name.clone())
            .or_insert_with(|| QueueState::new(spec.clone()));
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), TransportError> {
        {
            let mut guard = self.shared.lock();
            let state = self.live(&mut guard)?;
            state.queue_mut(queue)?.ready.push_back(StoredMessage {
                body: message.body,
                content_type: message.content_type,
                deliveries: 0,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Option<Box<dyn Delivery>>, TransportError> {
        loop {
            // Register interest before looking, so a publish between the
            // check and the wait is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take(queue)? {
                Take::Delivered(delivery) => return Ok(Some(Box::new(delivery))),
                Take::Closed => return Ok(None),
                Take::Empty(Some(due)) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(due) => {},
                    }
                }
                Take::Empty(None) => notified.await,
            }
        }
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, TransportError> {
        let mut guard = self.shared.lock();
        let q = guard.queue_mut(queue)?;
        Ok(q.stats())
    }
}

impl Drop for BrokerChannel {
    fn drop(&mut self) {
        let returned = {
            let mut state = self.shared.lock();
            if state.epoch != self.epoch {
                0
            } else {
                state.requeue_in_flight(Some(self.id))
            }
        };
        if returned > 0 {
            debug!(channel = self.id, returned, "channel dropped, deliveries requeued");
            self.shared.notify.notify_waiters();
        }
    }
}

pub struct BrokerDelivery {
    id: DeliveryId,
    queue: String,
    body: Vec<u8>,
    content_type: String,
    attempt: u32,
    shared: Arc<Shared>,
}

#[async_trait]
impl Delivery for BrokerDelivery {
    fn id(&self) -> DeliveryId {
        self.id
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn content_type(&self) -> &str {
        &self.content_type
    }

    fn attempt(&self) -> u32 {
        self.attempt
    }

    async fn ack(self: Box<Self>) -> Result<(), TransportError> {
        self.shared.settle(&self.queue, self.id, None)
    }

    async fn nack(self: Box<Self>, nack: Nack) -> Result<(), TransportError> {
        self.shared.settle(&self.queue, self.id, Some(nack))
    }
}
