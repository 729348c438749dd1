//! Handler trait - Message を処理する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<M>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<M, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec;
use super::message::Message;
use crate::domain::PaymentError;

/// Handler は Message を 1 件処理する
///
/// `Ok(())` なら consumer が ack、`Err` なら Decider に従って nack する。
/// 同じメッセージが何度届いても結果が変わらないこと（冪等）。
///
/// # ジェネリクスによる型安全性
/// - `Handler<ProcessingInstruction>` は `ProcessingInstruction` しか受け取れない
#[async_trait]
pub trait Handler<M: Message>: Send + Sync {
    async fn handle(&self, message: M) -> Result<(), PaymentError>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// バイト列のデコードまで含む。デコード失敗は `PaymentError::Malformed`。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, content_type: &str, body: &[u8]) -> Result<(), PaymentError>;

    fn kind(&self) -> &'static str;
}

pub struct TypedHandler<M: Message, H: Handler<M>> {
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message, H: Handler<M>> TypedHandler<M, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Message, H: Handler<M>> DynHandler for TypedHandler<M, H> {
    async fn handle_dyn(&self, content_type: &str, body: &[u8]) -> Result<(), PaymentError> {
        let message: M = codec::decode(content_type, body)?;
        self.handler.handle(message).await
    }

    fn kind(&self) -> &'static str {
        M::KIND
    }
}
