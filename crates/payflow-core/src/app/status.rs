//! Status - パイプラインの状態スナップショット

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ports::{QueueStats, StatusCounts};

/// What the pipeline looks like right now.
///
/// # 使用例
/// ```ignore
/// let report = service.status().await?;
/// println!("{}", serde_json::to_string_pretty(&report)?);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub captured_at: DateTime<Utc>,
    pub payments: StatusCounts,
    pub queue: QueueReport,
    pub dead_letter: Option<QueueReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueReport {
    pub name: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

impl StatusReport {
    /// No payment is waiting and nothing is queued or in flight.
    pub fn is_settled(&self) -> bool {
        self.payments.pending == 0 && self.queue.stats.outstanding() == 0
    }
}
