//! WorkerGroup - 複数の受信ループの起動と停止
//!
//! # フロー
//! 1. spawn() でワーカー数ぶんのチャネルを開いてキューを宣言（失敗すればここでエラー）
//! 2. 各ワーカーが Consumer::run() を回す
//! 3. 接続が切れたら、shutdown が来るまでバックオフしながらチャネルを開き直す
//! 4. shutdown_and_join() で処理中の delivery の確定を待って終了

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::consumer::Consumer;
use super::topology::Topology;
use crate::ports::{Connection, QueueChannel, TransportError};

const RECONNECT_MIN: Duration = Duration::from_millis(50);
const RECONNECT_MAX: Duration = Duration::from_secs(5);

/// Worker group handle.
/// - ワーカーごとに専用チャネルを 1 本開く（チャネルはワーカーと一緒に drop される）
/// - `request_shutdown()` で新しい delivery の受け取りを止める
/// - `shutdown_and_join()` で処理中の delivery の ack/nack まで待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` consumer loops.
    ///
    /// All channels are opened and declared before any loop starts, so a
    /// broker problem fails here rather than inside a background task.
    pub async fn spawn(
        n: usize,
        connection: Arc<dyn Connection>,
        topology: &Topology,
        consumer: Arc<Consumer>,
    ) -> Result<Self, TransportError> {
        let mut channels = Vec::with_capacity(n);
        for _ in 0..n {
            let channel = connection.open_channel().await?;
            topology.declare(channel.as_ref()).await?;
            channels.push(channel);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for (worker_id, channel) in channels.into_iter().enumerate() {
            let consumer = Arc::clone(&consumer);
            let connection = Arc::clone(&connection);
            let topology = topology.clone();
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                info!(worker_id, queue = consumer.queue(), "consumer started");
                let mut channel = Some(channel);
                let mut backoff = RECONNECT_MIN;
                loop {
                    let current = match channel.take() {
                        Some(ch) => ch,
                        None => match open_declared(connection.as_ref(), &topology).await {
                            Ok(ch) => {
                                info!(worker_id, "consumer reconnected");
                                backoff = RECONNECT_MIN;
                                ch
                            }
                            Err(e) => {
                                debug!(worker_id, error = %e, retry_in_ms = backoff.as_millis() as u64, "reconnect failed");
                                if wait_or_shutdown(&mut rx, backoff).await {
                                    break;
                                }
                                backoff = (backoff * 2).min(RECONNECT_MAX);
                                continue;
                            }
                        },
                    };

                    if let Err(e) = consumer.run(current.as_ref(), &mut rx).await {
                        warn!(worker_id, error = %e, "consumer interrupted");
                    }
                    // returns unsettled deliveries to the queue
                    drop(current);

                    if *rx.borrow() {
                        break;
                    }
                    warn!(worker_id, "connection lost, reopening channel");
                    if wait_or_shutdown(&mut rx, backoff).await {
                        break;
                    }
                }
                info!(worker_id, "consumer stopped");
            });
            joins.push(join);
        }

        Ok(Self { shutdown_tx, joins })
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// 実行中の handler は止めない。新しい delivery を取らなくなるだけ。
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!(error = %e, "consumer task panicked");
            }
        }
    }
}

async fn open_declared(
    connection: &dyn Connection,
    topology: &Topology,
) -> Result<Box<dyn QueueChannel>, TransportError> {
    let channel = connection.open_channel().await?;
    topology.declare(channel.as_ref()).await?;
    Ok(channel)
}

/// Sleep for `delay` unless shutdown comes first. Returns true on shutdown.
async fn wait_or_shutdown(rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    let sender_gone = tokio::select! {
        changed = rx.changed() => changed.is_err(),
        _ = tokio::time::sleep(delay) => false,
    };
    sender_gone || *rx.borrow()
}
