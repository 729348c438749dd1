//! Typed - 型付きメッセージ API
//!
//! メッセージ種別の取り違えを型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Message` trait, `Handler<M>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod codec;
pub mod handler;
pub mod message;
pub mod publish;

pub use self::codec::{CONTENT_TYPE_JSON, CodecError};
pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::message::Message;
pub use self::publish::publish;
