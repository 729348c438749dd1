//! payflow-core
//!
//! Idempotent payment settlement pipeline: a durable record store, an
//! at-least-once queue, and the processor that settles each payment exactly
//! once no matter how often its instruction is delivered.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, payment, instruction, retry, decision, settlement, outbox, errors）
//! - **ports**: 抽象化レイヤー（RecordStore, Connection / QueueChannel / Delivery, Clock, IdGenerator）
//! - **typed**: 型付きメッセージ API（Message, Handler, codec）
//! - **impls**: インメモリ実装（InMemoryRecordStore, InMemoryBroker）
//! - **app**: アプリケーション層（intake, processor, consumer, worker group, outbox relay, builder）
//! - **config**: `PAYFLOW_*` 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;
