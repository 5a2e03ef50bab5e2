//! DispatchLoop - キューからバッチを作って publisher に渡す唯一のワーカー
//!
//! # フロー
//! 1. キューが空 & Running なら Notify で待つ
//! 2. 先頭から最大 batch_size 件を取り出して Batch を作る（埋まるまで待たない）
//! 3. publisher.publish_batch() を await（ロックは握らない）
//! 4. 成功 → バッチ内を全て succeed
//! 5. 失敗 → Faulted に遷移し、バッチ内 + キューに残った全件を同じエラーで fail
//! 6. Stopping / Stopped / Faulted なら抜ける
//!
//! in-flight は常に最大 1 バッチ。
//!
//! publish は別タスクで走らせて JoinHandle を await する。publisher が panic しても
//! loop 自体は生き残り、その panic は publish 失敗として扱われる（Faulted）。

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::completion::Resolver;
use super::producer::{Inner, PendingItem};
use crate::domain::{Batch, BoxError, ProducerState, PublisherPanicked, SharedError};
use crate::ports::{Ack, BatchPublisher};

enum Next<M> {
    Wait,
    Dispatch(Vec<PendingItem<M>>),
    Exit,
}

pub(crate) async fn run<M: Send + Sync + 'static>(
    inner: Arc<Inner<M>>,
    publisher: Arc<dyn BatchPublisher<M>>,
) {
    let _guard = ExitGuard {
        inner: Arc::clone(&inner),
    };

    loop {
        let next = {
            let mut shared = inner.lock();
            let state = shared.state;
            match state {
                ProducerState::Running if shared.queue.is_empty() => Next::Wait,
                ProducerState::Running => {
                    let items = shared.queue.drain_batch(inner.batch_size);
                    shared.counts.in_flight = items.len();
                    shared.counts.batches += 1;
                    shared.counts.last_dispatch_at = Some(Utc::now());
                    Next::Dispatch(items)
                }
                ProducerState::Stopping => {
                    inner.transition(&mut shared, ProducerState::Stopped);
                    Next::Exit
                }
                ProducerState::Stopped | ProducerState::Faulted => Next::Exit,
            }
        };

        match next {
            // notify_one は permit を残すので、ロック解放後の push も取りこぼさない
            Next::Wait => inner.notify.notified().await,
            Next::Dispatch(items) => dispatch(&inner, &publisher, items).await,
            Next::Exit => break,
        }
    }

    debug!(producer_id = %inner.id, "dispatch loop exited");
}

async fn dispatch<M: Send + Sync + 'static>(
    inner: &Inner<M>,
    publisher: &Arc<dyn BatchPublisher<M>>,
    items: Vec<PendingItem<M>>,
) {
    let (payloads, resolvers): (Vec<M>, Vec<Resolver>) = items
        .into_iter()
        .map(|item| (item.payload, item.resolver))
        .unzip();
    let batch = Batch::new(payloads);
    let batch_id = batch.id();
    let created_at = batch.created_at();
    let size = batch.len();

    debug!(producer_id = %inner.id, %batch_id, size, topic = %inner.topic, "dispatching batch");
    let result = publish(Arc::clone(publisher), inner.topic.clone(), batch).await;
    let elapsed_ms = (Utc::now() - created_at).num_milliseconds();

    match result {
        Ok(ack) => {
            {
                let mut shared = inner.lock();
                shared.counts.in_flight = 0;
                shared.counts.succeeded += size;
            }
            debug!(
                producer_id = %inner.id,
                %batch_id,
                accepted = ack.accepted,
                elapsed_ms,
                "batch published"
            );
            for resolver in resolvers {
                resolver.succeed();
            }
        }
        Err(err) => {
            let err: SharedError = Arc::from(err);

            // 状態を先に Faulted にしてから Completion を解決する
            // (失敗を見た caller が次に submit したら必ず ProducerStopped になる)
            let queued = {
                let mut shared = inner.lock();
                shared.counts.in_flight = 0;
                let queued = if inner.transition(&mut shared, ProducerState::Faulted) {
                    shared.queue.drain_all()
                } else {
                    Vec::new()
                };
                shared.counts.failed += size + queued.len();
                queued
            };

            warn!(
                producer_id = %inner.id,
                %batch_id,
                error = %err,
                in_batch = size,
                elapsed_ms,
                queued = queued.len(),
                "publish failed, failing all pending items"
            );
            let pending = queued.into_iter().map(|item| item.resolver);
            for resolver in resolvers.into_iter().chain(pending) {
                resolver.fail(Arc::clone(&err));
            }
        }
    }
}

/// Publish on a separate task so a panicking publisher cannot unwind the loop.
async fn publish<M: Send + Sync + 'static>(
    publisher: Arc<dyn BatchPublisher<M>>,
    topic: String,
    batch: Batch<M>,
) -> Result<Ack, BoxError> {
    let batch_id = batch.id();
    let task = tokio::spawn(async move { publisher.publish_batch(&topic, &batch).await });
    match task.await {
        Ok(result) => result,
        Err(join_err) => Err(Box::new(PublisherPanicked {
            batch_id,
            message: join_err.to_string(),
        })),
    }
}

/// Runs on every exit path of the loop task (e.g. runtime shutdown aborting it).
///
/// A non-terminal state is forced to `Stopped`. Queued stragglers are canceled
/// and an aborted in-flight batch is counted as canceled too.
struct ExitGuard<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Drop for ExitGuard<M> {
    fn drop(&mut self) {
        let leftovers = {
            let mut shared = self.inner.lock();
            if shared.state.is_terminal() {
                return;
            }
            self.inner.transition(&mut shared, ProducerState::Stopped);
            let in_flight = std::mem::take(&mut shared.counts.in_flight);
            let items = shared.queue.drain_all();
            shared.counts.canceled += items.len() + in_flight;
            items
        };
        for item in leftovers {
            item.resolver.cancel();
        }
    }
}
