//! BatchPublisher port - バッチを実際に送り出す外部コラボレータ
//!
//! 配送（シリアライズ、トランスポート、リトライ）は全て publisher 側の責務。
//! producer はこの trait 越しにしか publisher を知らない。

use async_trait::async_trait;

use crate::domain::{Batch, BoxError};

/// Publisher acknowledgement for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Number of payloads the publisher accepted.
    pub accepted: usize,
}

impl Ack {
    pub fn new(accepted: usize) -> Self {
        Self { accepted }
    }
}

/// Batch-capable publisher.
///
/// # 契約
/// - 遅くてもよい（admission はブロックされない）
/// - どんなエラーを返してもよい。エラーはそのまま各 Completion に伝播する
/// - producer から同時に呼ばれることはない（in-flight は常に最大 1）
#[async_trait]
pub trait BatchPublisher<M>: Send + Sync {
    async fn publish_batch(&self, topic: &str, batch: &Batch<M>) -> Result<Ack, BoxError>;
}
