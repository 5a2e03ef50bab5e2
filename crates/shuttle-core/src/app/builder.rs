//! ProducerBuilder - producer の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 不正な設定ではワーカーを起動しない
//! - tokio runtime が無い場所での spawn を panic ではなく BuildError にする

use std::sync::Arc;

use tracing::{Instrument, info, info_span};

use super::config::ProducerConfig;
use super::dispatch_loop;
use super::producer::{BatchProducer, Inner};
use crate::domain::ConfigError;
use crate::ports::BatchPublisher;

/// BuildError は producer 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no tokio runtime is running; build the producer inside a runtime")]
    NoRuntime,
}

/// ProducerBuilder は BatchProducer を構築
///
/// # 使用例
/// ```ignore
/// let producer = ProducerBuilder::new(publisher)
///     .topic("orders")
///     .batch_size(10)
///     .max_queue_size(1_000)
///     .build()?;
/// ```
pub struct ProducerBuilder<M> {
    publisher: Arc<dyn BatchPublisher<M>>,
    config: ProducerConfig,
}

impl<M: Send + Sync + 'static> ProducerBuilder<M> {
    /// Defaults: empty topic (must be set), batch_size 1, unbounded queue.
    pub fn new(publisher: Arc<dyn BatchPublisher<M>>) -> Self {
        Self {
            publisher,
            config: ProducerConfig::new("", 1),
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.config.max_queue_size = max_queue_size;
        self
    }

    /// Replace every setting at once (e.g. with a config loaded from JSON).
    pub fn config(mut self, config: ProducerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and spawn the dispatch loop on the current runtime.
    pub fn build(self) -> Result<BatchProducer<M>, BuildError> {
        self.config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

        let inner = Arc::new(Inner::new(&self.config));
        let span = info_span!("dispatch_loop", producer_id = %inner.id, topic = %inner.topic);
        handle.spawn(dispatch_loop::run(Arc::clone(&inner), self.publisher).instrument(span));

        info!(
            producer_id = %inner.id,
            topic = %inner.topic,
            batch_size = self.config.batch_size,
            max_queue_size = self.config.max_queue_size,
            "producer started"
        );
        Ok(BatchProducer { inner })
    }
}

impl<M: Send + Sync + 'static> BatchProducer<M> {
    /// Shorthand for `ProducerBuilder::new(publisher).config(config).build()`.
    pub fn spawn(
        config: ProducerConfig,
        publisher: Arc<dyn BatchPublisher<M>>,
    ) -> Result<Self, BuildError> {
        ProducerBuilder::new(publisher).config(config).build()
    }
}
