//! PublisherLoop - outbox に残った処理指示の再配送
//!
//! # フロー
//! 1. RecordStore::pull_outbox() で未送信エントリを取得（猶予期間より古いもの）
//! 2. InstructionPublisher::publish() で配送
//! 3. 成功 → RecordStore::ack_outbox()
//! 4. 失敗 → RecordStore::fail_outbox()。接続が閉じていればこの周回は打ち切り
//!
//! 二重 publish は起こりうるが、Processor 側が冪等なので問題ない。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::publisher::InstructionPublisher;
use crate::domain::{PaymentError, ProcessingInstruction};
use crate::ports::{Clock, RecordStore, TransportError};

/// Result of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
}

pub struct PublisherLoop {
    store: Arc<dyn RecordStore>,
    publisher: Arc<InstructionPublisher>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    grace: Duration,
    batch: usize,
}

impl PublisherLoop {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<InstructionPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            interval: Duration::from_secs(1),
            grace: Duration::from_secs(2),
            batch: 100,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// One pass over the outbox.
    pub async fn run_once(&self) -> Result<RelayReport, PaymentError> {
        let grace = chrono::Duration::from_std(self.grace)
            .map_err(|e| PaymentError::Invalid(format!("outbox grace: {e}")))?;
        let cutoff = self.clock.now() - grace;
        let entries = self.store.pull_outbox(self.batch, cutoff).await?;

        let mut report = RelayReport::default();
        for entry in entries {
            let id = entry.payment_id;
            match self.publisher.publish(&ProcessingInstruction::new(id)).await {
                Ok(()) => {
                    self.store.ack_outbox(id).await?;
                    report.published += 1;
                    debug!(payment_id = %id, "outbox entry relayed");
                }
                Err(e) => {
                    self.store.fail_outbox(id, &e.to_string()).await?;
                    report.failed += 1;
                    warn!(payment_id = %id, attempts = entry.attempts + 1, error = %e, "outbox relay failed");
                    if matches!(e, PaymentError::Transport(TransportError::Closed)) {
                        break;
                    }
                }
            }
        }
        Ok(report)
    }

    pub async fn run(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            match self.run_once().await {
                Ok(report) if report.published > 0 || report.failed > 0 => {
                    info!(published = report.published, failed = report.failed, "outbox relay pass");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "outbox relay pass failed"),
            }
        }
    }

    pub fn spawn(self) -> PublisherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        PublisherHandle { shutdown_tx, join }
    }
}

pub struct PublisherHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl PublisherHandle {
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "publisher loop panicked");
        }
    }
}
