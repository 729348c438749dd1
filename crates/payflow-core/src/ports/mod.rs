//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! 各 trait は外部システム（リレーショナル DB, メッセージブローカー）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - RecordStore が正本（source of truth）
//! - キューは配送指示（payment_id のみ）
//! - 時刻と ID 生成も差し替え可能にしてテストを決定的にする

pub mod clock;
pub mod id_generator;
pub mod queue_channel;
pub mod record_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_channel::{
    Connection, Delivery, Nack, OutboundMessage, QueueChannel, QueueSpec, QueueStats,
    TransportError,
};
pub use self::record_store::{RecordStore, StatusCounts};
