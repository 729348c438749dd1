//! JSON codec - Message とキュー上のバイト列の相互変換

use thiserror::Error;

use super::message::Message;
use crate::ports::OutboundMessage;

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed message body: {0}")]
    Decode(String),

    #[error("cannot encode message: {0}")]
    Encode(String),

    #[error("unsupported content type: {0}")]
    ContentType(String),
}

/// Serialize `message` as a persistent JSON message.
pub fn encode<M: Message>(message: &M) -> Result<OutboundMessage, CodecError> {
    let body = serde_json::to_vec(message).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(OutboundMessage {
        body,
        content_type: CONTENT_TYPE_JSON.to_string(),
        persistent: true,
    })
}

/// Decode a delivery body.
///
/// An empty content type is accepted as JSON; publishers that omit the header
/// still produce JSON bodies.
pub fn decode<M: Message>(content_type: &str, body: &[u8]) -> Result<M, CodecError> {
    if !content_type.is_empty() && !content_type.starts_with(CONTENT_TYPE_JSON) {
        return Err(CodecError::ContentType(content_type.to_string()));
    }
    serde_json::from_slice(body).map_err(|e| CodecError::Decode(e.to_string()))
}
