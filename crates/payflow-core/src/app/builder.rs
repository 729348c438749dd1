//! ServiceBuilder - パイプラインの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use super::consumer::Consumer;
use super::intake::PaymentIntake;
use super::processor::PaymentProcessor;
use super::publisher::InstructionPublisher;
use super::publisher_loop::{PublisherHandle, PublisherLoop};
use super::status::{QueueReport, StatusReport};
use super::topology::Topology;
use super::worker_group::WorkerGroup;
use crate::config::{ConfigError, PayflowConfig};
use crate::domain::{ApproveAll, Decider, PaymentError, ProcessingInstruction, Settler};
use crate::ports::{Clock, Connection, RecordStore, SystemClock, TransportError};
use crate::typed::TypedHandler;

/// ServiceBuilder はパイプラインを構築
///
/// # 使用例
/// ```ignore
/// let service = ServiceBuilder::new(PayflowConfig::from_env()?)
///     .store(Arc::new(InMemoryRecordStore::new()))
///     .connection(Arc::new(InMemoryBroker::new()))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - store と connection は必須。足りなければ build() が BuildError を返す
/// - 設定値も build() 時に検証する
/// - settler / decider / clock は省略可（ApproveAll / 設定由来 / SystemClock）
pub struct ServiceBuilder {
    config: PayflowConfig,
    store: Option<Arc<dyn RecordStore>>,
    connection: Option<Arc<dyn Connection>>,
    settler: Option<Arc<dyn Settler>>,
    decider: Option<Arc<dyn Decider>>,
    clock: Option<Arc<dyn Clock>>,
}

/// BuildError はパイプライン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("record store is not configured")]
    MissingStore,

    #[error("broker connection is not configured")]
    MissingConnection,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ServiceBuilder {
    pub fn new(config: PayflowConfig) -> Self {
        Self {
            config,
            store: None,
            connection: None,
            settler: None,
            decider: None,
            clock: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn connection(mut self, connection: Arc<dyn Connection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn settler(mut self, settler: Arc<dyn Settler>) -> Self {
        self.settler = Some(settler);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Service, BuildError> {
        self.config.validate()?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let connection = self.connection.ok_or(BuildError::MissingConnection)?;

        let topology = Topology::from_config(&self.config);
        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(self.config.decider()));
        let publisher = Arc::new(InstructionPublisher::new(
            Arc::clone(&connection),
            topology.clone(),
        ));

        Ok(Service {
            store,
            connection,
            settler: self.settler.unwrap_or_else(|| Arc::new(ApproveAll)),
            decider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            publisher,
            topology,
            config: self.config,
        })
    }
}

/// 構築済みのパイプライン
pub struct Service {
    config: PayflowConfig,
    topology: Topology,
    store: Arc<dyn RecordStore>,
    connection: Arc<dyn Connection>,
    settler: Arc<dyn Settler>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    publisher: Arc<InstructionPublisher>,
}

impl Service {
    pub fn config(&self) -> &PayflowConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    pub fn intake(&self) -> PaymentIntake {
        PaymentIntake::new(Arc::clone(&self.store), Arc::clone(&self.publisher))
    }

    pub fn consumer(&self) -> Consumer {
        let processor = PaymentProcessor::new(Arc::clone(&self.store), Arc::clone(&self.settler));
        Consumer::new(
            self.topology.queue_name(),
            Arc::new(TypedHandler::<ProcessingInstruction, _>::new(processor)),
            Arc::clone(&self.decider),
        )
    }

    /// Start `config.workers` consumer loops.
    pub async fn start_processor(&self) -> Result<WorkerGroup, TransportError> {
        WorkerGroup::spawn(
            self.config.workers,
            Arc::clone(&self.connection),
            &self.topology,
            Arc::new(self.consumer()),
        )
        .await
    }

    pub fn publisher_loop(&self) -> PublisherLoop {
        PublisherLoop::new(
            Arc::clone(&self.store),
            Arc::clone(&self.publisher),
            Arc::clone(&self.clock),
        )
        .with_interval(self.config.outbox_interval())
        .with_grace(self.config.outbox_grace())
        .with_batch(self.config.outbox_batch)
    }

    pub fn start_publisher(&self) -> PublisherHandle {
        self.publisher_loop().spawn()
    }

    pub async fn status(&self) -> Result<StatusReport, PaymentError> {
        let payments = self.store.count_by_status().await?;

        let channel = self.connection.open_channel().await?;
        self.topology.declare(channel.as_ref()).await?;
        let queue = QueueReport {
            name: self.topology.queue_name().to_string(),
            stats: channel.stats(self.topology.queue_name()).await?,
        };
        let dead_letter = match self.topology.dead_letter_name() {
            Some(name) => Some(QueueReport {
                name: name.to_string(),
                stats: channel.stats(name).await?,
            }),
            None => None,
        };

        Ok(StatusReport {
            captured_at: self.clock.now(),
            payments,
            queue,
            dead_letter,
        })
    }
}
