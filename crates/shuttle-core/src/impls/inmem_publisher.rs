//! InMemoryPublisher - 開発用・テスト用の publisher
//!
//! # 学習ポイント
//! - 受け取ったバッチをそのまま記録する（順序・サイズの検証に使う）
//! - 振る舞い（成功 / 遅延 / 永久に返らない / 失敗）を実行中に切り替えられる
//! - Notify::notify_waiters で「publish が呼ばれた」ことをテストに知らせる

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::{Batch, BatchId, BoxError};
use crate::ports::{Ack, BatchPublisher};

/// How `InMemoryPublisher` answers a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishBehavior {
    /// Accept immediately.
    #[default]
    Succeed,
    /// Accept after a delay.
    Delay(Duration),
    /// Never return.
    Hang,
    /// Fail immediately.
    Fail,
    /// Fail after a delay.
    FailAfter(Duration),
}

/// Error returned by `InMemoryPublisher` in the failing modes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("in-memory publisher rejected {batch_id} on topic '{topic}'")]
pub struct InMemoryPublishError {
    pub topic: String,
    pub batch_id: BatchId,
}

/// InMemoryPublisher は publish されたバッチを記録するだけの publisher
///
/// # 使用例
/// ```ignore
/// let publisher = Arc::new(InMemoryPublisher::new());
/// let producer = ProducerBuilder::new(publisher.clone()).topic("t").build()?;
/// // ...
/// assert_eq!(publisher.batches().concat(), expected);
/// ```
pub struct InMemoryPublisher<M> {
    behavior: Mutex<PublishBehavior>,
    batches: Mutex<Vec<Vec<M>>>,
    calls: AtomicUsize,
    call_started: Notify,
}

impl<M: Clone + Send + Sync + 'static> InMemoryPublisher<M> {
    pub fn new() -> Self {
        Self::with_behavior(PublishBehavior::Succeed)
    }

    pub fn with_behavior(behavior: PublishBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            call_started: Notify::new(),
        }
    }

    /// Change behavior for subsequent calls.
    pub fn set_behavior(&self, behavior: PublishBehavior) {
        *self.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Payloads of every publish call so far, in call order.
    pub fn batches(&self) -> Vec<Vec<M>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of publish calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` publish calls have started.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            // notified() を先に作ってからチェックする（取りこぼし防止）
            let notified = self.call_started.notified();
            if self.calls() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl<M: Clone + Send + Sync + 'static> Default for InMemoryPublisher<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<M: Clone + Send + Sync + 'static> BatchPublisher<M> for InMemoryPublisher<M> {
    async fn publish_batch(&self, topic: &str, batch: &Batch<M>) -> Result<Ack, BoxError> {
        let behavior = *self.behavior.lock().unwrap_or_else(PoisonError::into_inner);
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch.payloads().to_vec());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_started.notify_waiters();

        let reject = || -> BoxError {
            Box::new(InMemoryPublishError {
                topic: topic.to_string(),
                batch_id: batch.id(),
            })
        };

        match behavior {
            PublishBehavior::Succeed => Ok(Ack::new(batch.len())),
            PublishBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Ack::new(batch.len()))
            }
            PublishBehavior::Hang => std::future::pending().await,
            PublishBehavior::Fail => Err(reject()),
            PublishBehavior::FailAfter(delay) => {
                tokio::time::sleep(delay).await;
                Err(reject())
            }
        }
    }
}
