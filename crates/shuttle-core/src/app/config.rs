//! ProducerConfig - 構築時パラメータ
//!
//! 起動時に validate() で弾く（Fail-fast）。実行中に変わることはない。

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Default backlog bound: practically unbounded.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = usize::MAX;

fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

/// Construction parameters for a `BatchProducer`.
///
/// ```ignore
/// let config = ProducerConfig::from_json(r#"{"topic":"orders","batch_size":10}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerConfig {
    /// Topic passed to every publisher call.
    pub topic: String,

    /// Upper bound on payloads per batch.
    pub batch_size: usize,

    /// Upper bound on queued (not yet dispatched) items.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

impl ProducerConfig {
    pub fn new(topic: impl Into<String>, batch_size: usize) -> Self {
        Self {
            topic: topic.into(),
            batch_size,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Parse and validate.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }
}
