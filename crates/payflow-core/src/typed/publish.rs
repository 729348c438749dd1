//! 型付き publish

use super::codec;
use super::message::Message;
use crate::domain::PaymentError;
use crate::ports::QueueChannel;

/// Encode `message` as persistent JSON and hand it to the broker.
pub async fn publish<M: Message>(
    channel: &dyn QueueChannel,
    queue: &str,
    message: &M,
) -> Result<(), PaymentError> {
    let outbound = codec::encode(message)?;
    channel.publish(queue, outbound).await?;
    Ok(())
}
