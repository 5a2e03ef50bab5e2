//! Status - producer のカウンタ

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ProducerState;

/// Point-in-time snapshot of a producer.
///
/// `queued` と `in_flight` は現在値、それ以外は累計。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerCounts {
    pub queued: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub canceled: usize,
    pub rejected: usize,
    pub batches: usize,
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

impl ProducerCounts {
    /// Items accepted and already resolved.
    pub fn resolved(&self) -> usize {
        self.succeeded + self.failed + self.canceled
    }
}

/// Serializable status view (state + counts), printed by the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerStatus {
    pub producer_id: String,
    pub topic: String,
    pub state: ProducerState,
    pub counts: ProducerCounts,
}
