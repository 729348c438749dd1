//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryRecordStore**: 正本のインメモリ版
//! - **InMemoryBroker**: at-least-once ブローカーのインメモリ版
//!
//! # 本番用実装
//! リレーショナル DB / AMQP ブローカー向けの実装は同じ trait の裏に
//! 別クレートとして差し込む想定。

pub mod inmem_broker;
pub mod inmem_store;

pub use self::inmem_broker::{BrokerChannel, BrokerDelivery, InMemoryBroker};
pub use self::inmem_store::InMemoryRecordStore;
