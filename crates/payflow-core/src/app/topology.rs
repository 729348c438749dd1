//! キュー構成（メインキュー + dead-letter キュー）の宣言

use crate::config::PayflowConfig;
use crate::ports::{QueueChannel, QueueSpec, TransportError};

/// Queues the pipeline needs. Declared by every channel before use; declaring
/// is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub queue: QueueSpec,
    pub dead_letter: Option<QueueSpec>,
}

impl Topology {
    pub fn from_config(config: &PayflowConfig) -> Self {
        let dead_letter = config
            .dead_letter_queue
            .as_ref()
            .map(|name| QueueSpec::durable(name.clone()));
        let mut queue = QueueSpec::durable(config.queue.clone());
        if let Some(dlq) = &dead_letter {
            queue = queue.with_dead_letter(dlq.name.clone());
        }
        Self { queue, dead_letter }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    pub fn dead_letter_name(&self) -> Option<&str> {
        self.dead_letter.as_ref().map(|spec| spec.name.as_str())
    }

    /// Dead-letter queue first, so the main queue never points at a missing one.
    pub async fn declare(&self, channel: &dyn QueueChannel) -> Result<(), TransportError> {
        if let Some(dlq) = &self.dead_letter {
            channel.declare(dlq).await?;
        }
        channel.declare(&self.queue).await
    }
}
