//! App - アプリケーション層
//!
//! ports を組み合わせてパイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **ServiceBuilder / Service**: 構築とワイヤリング
//! - **PaymentIntake**: 支払いの受付（validate → create → publish）
//! - **PaymentProcessor**: 処理指示のハンドラ（settle）
//! - **Consumer / WorkerGroup**: 受信ループ（receive → handle → ack/nack）
//! - **PublisherLoop**: outbox の再配送
//! - **StatusReport**: 状態スナップショット

pub mod builder;
pub mod consumer;
pub mod intake;
pub mod processor;
pub mod publisher;
pub mod publisher_loop;
pub mod status;
pub mod topology;
pub mod worker_group;

pub use self::builder::{BuildError, Service, ServiceBuilder};
pub use self::consumer::{Consumer, DeliveryOutcome};
pub use self::intake::PaymentIntake;
pub use self::processor::PaymentProcessor;
pub use self::publisher::InstructionPublisher;
pub use self::publisher_loop::{PublisherHandle, PublisherLoop, RelayReport};
pub use self::status::{QueueReport, StatusReport};
pub use self::topology::Topology;
pub use self::worker_group::WorkerGroup;
