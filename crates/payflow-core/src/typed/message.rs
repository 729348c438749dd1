//! Message trait - キューに流れる型付きメッセージ
//!
//! # 学習ポイント
//! - Associated Constants (`const KIND`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Message はメッセージ種別と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Refund {
///     payment_id: PaymentId,
/// }
///
/// impl Message for Refund {
///     const KIND: &'static str = "payment.refund.v1";
/// }
/// ```
///
/// # 命名規約
/// - `{domain}.{action}.v{major}`
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}
