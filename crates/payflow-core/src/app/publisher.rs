//! InstructionPublisher - 処理指示の publish
//!
//! チャネルは最初の publish で開き、以後使い回す。
//! 接続が閉じていたら（TransportError::Closed）チャネルを捨て、次回開き直す。

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use super::topology::Topology;
use crate::domain::{PaymentError, ProcessingInstruction};
use crate::ports::{Connection, QueueChannel, TransportError};
use crate::typed;

pub struct InstructionPublisher {
    connection: Arc<dyn Connection>,
    topology: Topology,
    channel: Mutex<Option<Box<dyn QueueChannel>>>,
}

impl InstructionPublisher {
    pub fn new(connection: Arc<dyn Connection>, topology: Topology) -> Self {
        Self {
            connection,
            topology,
            channel: Mutex::new(None),
        }
    }

    pub async fn publish(&self, instruction: &ProcessingInstruction) -> Result<(), PaymentError> {
        let mut slot = self.channel.lock().await;

        let channel = match slot.take() {
            Some(channel) => channel,
            None => {
                let channel = self.connection.open_channel().await?;
                self.topology.declare(channel.as_ref()).await?;
                debug!(queue = self.topology.queue_name(), "publisher channel opened");
                channel
            }
        };

        let result = typed::publish(channel.as_ref(), self.topology.queue_name(), instruction).await;
        match &result {
            Err(PaymentError::Transport(TransportError::Closed)) => {
                // stale channel, dropped here
            }
            _ => *slot = Some(channel),
        }
        result
    }
}
