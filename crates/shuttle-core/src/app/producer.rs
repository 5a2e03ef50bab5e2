//! BatchProducer - admission とライフサイクル
//!
//! # フロー
//! 1. submit(): 状態チェック → キューに push（満杯なら即 QueueFull）→ dispatch loop を起こす
//! 2. dispatch loop（`dispatch_loop.rs`）がキューを先頭から batch_size 件ずつ取り出して publish
//! 3. stop(): Running → Stopping、キューに残ったものは即 Canceled、in-flight の完了を待って Stopped
//!
//! 共有状態（キュー・状態・カウンタ）は 1 つの `std::sync::Mutex` の中だけにある。
//! ロックを握ったまま await しない。

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, watch};
use tracing::{debug, info};

use super::completion::{Completion, Resolver, completion_pair};
use super::config::ProducerConfig;
use super::status::{ProducerCounts, ProducerStatus};
use crate::domain::{ProducerError, ProducerId, ProducerState, SubmitError};
use crate::queue::PendingQueue;

/// One accepted message waiting for dispatch.
#[derive(Debug)]
pub(crate) struct PendingItem<M> {
    pub(crate) payload: M,
    pub(crate) resolver: Resolver,
}

/// State guarded by the producer mutex.
pub(crate) struct Shared<M> {
    pub(crate) state: ProducerState,
    pub(crate) queue: PendingQueue<PendingItem<M>>,
    pub(crate) counts: ProducerCounts,
}

/// State shared between the handle, the dispatch loop and `stop` futures.
pub(crate) struct Inner<M> {
    pub(crate) id: ProducerId,
    pub(crate) topic: String,
    pub(crate) batch_size: usize,
    shared: Mutex<Shared<M>>,
    pub(crate) notify: Notify,
    state_tx: watch::Sender<ProducerState>,
}

impl<M> Inner<M> {
    pub(crate) fn new(config: &ProducerConfig) -> Self {
        let (state_tx, _) = watch::channel(ProducerState::Running);
        Self {
            id: ProducerId::generate(),
            topic: config.topic.clone(),
            batch_size: config.batch_size,
            shared: Mutex::new(Shared {
                state: ProducerState::Running,
                queue: PendingQueue::new(config.max_queue_size),
                counts: ProducerCounts::default(),
            }),
            notify: Notify::new(),
            state_tx,
        }
    }

    /// Lock the shared state.
    ///
    /// Every critical section leaves `Shared` consistent, so a poisoned lock
    /// is still safe to use.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Shared<M>> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if the transition is legal. Must be called under the lock.
    pub(crate) fn transition(&self, shared: &mut Shared<M>, next: ProducerState) -> bool {
        let prev = shared.state;
        if !prev.can_transition_to(next) {
            return false;
        }
        shared.state = next;
        self.state_tx.send_replace(next);
        info!(producer_id = %self.id, from = %prev, to = %next, "producer state changed");
        true
    }

    fn submit(&self, payload: M) -> Result<Completion, SubmitError<M>> {
        let completion = {
            let mut shared = self.lock();
            if !shared.state.admits() {
                shared.counts.rejected += 1;
                let state = shared.state;
                return Err(SubmitError::new(
                    ProducerError::ProducerStopped { state },
                    payload,
                ));
            }

            let (resolver, completion) = completion_pair();
            if let Err(item) = shared.queue.try_push(PendingItem { payload, resolver }) {
                shared.counts.rejected += 1;
                let capacity = shared.queue.capacity();
                debug!(producer_id = %self.id, capacity, "pending queue full, rejecting");
                return Err(SubmitError::new(
                    ProducerError::QueueFull { capacity },
                    item.payload,
                ));
            }
            completion
        };

        self.notify.notify_one();
        Ok(completion)
    }

    /// Synchronous half of `stop`: stop admitting and cancel everything queued.
    pub(crate) fn begin_stop(&self) {
        let canceled = {
            let mut shared = self.lock();
            if !self.transition(&mut shared, ProducerState::Stopping) {
                return;
            }
            let items = shared.queue.drain_all();
            shared.counts.canceled += items.len();
            items
        };

        if !canceled.is_empty() {
            debug!(producer_id = %self.id, count = canceled.len(), "canceling queued items");
        }
        for item in canceled {
            item.resolver.cancel();
        }
        self.notify.notify_one();
    }

    pub(crate) fn snapshot(&self) -> (ProducerState, ProducerCounts) {
        let shared = self.lock();
        let mut counts = shared.counts.clone();
        counts.queued = shared.queue.len();
        (shared.state, counts)
    }
}

/// Batching message producer.
///
/// - `submit()` は同期的に受理 / 拒否し、受理したら `Completion` を返す
/// - 1 本の dispatch loop が FIFO 順にバッチを作って publisher に渡す
/// - publisher の失敗は producer 全体を Faulted にする（fail-fast）
///
/// Dropping the handle triggers the same shutdown as `stop()`.
pub struct BatchProducer<M: Send + Sync + 'static> {
    pub(crate) inner: Arc<Inner<M>>,
}

impl<M: Send + Sync + 'static> BatchProducer<M> {
    /// Submit one message.
    ///
    /// # Errors
    /// - `QueueFull` when the backlog is at capacity
    /// - `ProducerStopped` once the producer is stopping, stopped or faulted
    ///
    /// The rejected payload comes back inside the error (`into_payload`).
    pub fn submit(&self, payload: M) -> Result<Completion, SubmitError<M>> {
        self.inner.submit(payload)
    }

    /// Trigger graceful shutdown.
    ///
    /// The transition happens when this is called, not when the returned
    /// future is polled. The future resolves once the dispatch loop has exited.
    pub fn stop(&self) -> impl Future<Output = ()> + use<M> {
        self.inner.begin_stop();
        let mut state_rx = self.inner.state_tx.subscribe();
        async move {
            // sender lives in Inner; Err only if every owner is already gone
            let _ = state_rx.wait_for(|state| state.is_terminal()).await;
        }
    }

    pub fn state(&self) -> ProducerState {
        self.inner.lock().state
    }

    pub fn counts(&self) -> ProducerCounts {
        self.inner.snapshot().1
    }

    pub fn status(&self) -> ProducerStatus {
        let (state, counts) = self.inner.snapshot();
        ProducerStatus {
            producer_id: self.inner.id.to_string(),
            topic: self.inner.topic.clone(),
            state,
            counts,
        }
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ProducerState> {
        self.inner.state_tx.subscribe()
    }

    pub fn id(&self) -> ProducerId {
        self.inner.id
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn batch_size(&self) -> usize {
        self.inner.batch_size
    }
}

impl<M: Send + Sync + 'static> Drop for BatchProducer<M> {
    fn drop(&mut self) {
        self.inner.begin_stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
    use tokio::time::timeout;

    use super::*;
    use async_trait::async_trait;

    use crate::app::ProducerBuilder;
    use crate::domain::{Batch, BoxError, DeliveryError, PublisherPanicked};
    use crate::impls::{InMemoryPublishError, InMemoryPublisher, PublishBehavior};
    use crate::ports::{Ack, BatchPublisher};

    const WAIT: Duration = Duration::from_secs(5);
    const SHORT: Duration = Duration::from_millis(50);

    fn producer_with(
        publisher: &Arc<InMemoryPublisher<u32>>,
        batch_size: usize,
        max_queue_size: usize,
    ) -> BatchProducer<u32> {
        ProducerBuilder::<u32>::new(publisher.clone())
            .topic("orders")
            .batch_size(batch_size)
            .max_queue_size(max_queue_size)
            .build()
            .unwrap()
    }

    async fn outcome(completion: Completion) -> Result<(), DeliveryError> {
        timeout(WAIT, completion).await.expect("completion never resolved")
    }

    fn submit_all(producer: &BatchProducer<u32>, values: impl IntoIterator<Item = u32>) -> Vec<Completion> {
        values
            .into_iter()
            .map(|v| producer.submit(v).unwrap())
            .collect()
    }

    struct PanickingPublisher;

    #[async_trait]
    impl BatchPublisher<u32> for PanickingPublisher {
        async fn publish_batch(&self, _topic: &str, _batch: &Batch<u32>) -> Result<Ack, BoxError> {
            panic!("broker client bug");
        }
    }

    fn publish_error_batch(err: &DeliveryError) -> crate::domain::BatchId {
        err.cause()
            .and_then(|cause| cause.downcast_ref::<InMemoryPublishError>())
            .expect("expected the publisher's own error")
            .batch_id
    }

    #[tokio::test]
    async fn every_payload_is_published_once_in_order() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, 10, usize::MAX);

        let completions = submit_all(&producer, 1..=10_000);
        for completion in completions {
            outcome(completion).await.unwrap();
        }

        let batches = publisher.batches();
        assert!(batches.iter().all(|b| (1..=10).contains(&b.len())));
        assert!(batches.iter().any(|b| b.len() > 1));

        let published: Vec<u32> = batches.concat();
        assert_eq!(published, (1..=10_000).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submitters_keep_their_order() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Delay(
            Duration::from_millis(1),
        )));
        let producer = Arc::new(producer_with(&publisher, 8, usize::MAX));

        let mut tasks = Vec::new();
        for submitter in 0..4u32 {
            let producer = Arc::clone(&producer);
            tasks.push(tokio::spawn(async move {
                let values = (0..500u32).map(|i| submitter * 1_000 + i);
                let completions = submit_all(&producer, values);
                for completion in completions {
                    outcome(completion).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let batches = publisher.batches();
        assert!(batches.iter().all(|b| (1..=8).contains(&b.len())));
        assert!(batches.iter().any(|b| b.len() > 1));

        let published = batches.concat();
        assert_eq!(published.len(), 2_000);
        for submitter in 0..4u32 {
            let mine: Vec<u32> = published
                .iter()
                .copied()
                .filter(|v| v / 1_000 == submitter)
                .collect();
            let expected: Vec<u32> = (0..500u32).map(|i| submitter * 1_000 + i).collect();
            assert_eq!(mine, expected);
        }
    }

    #[rstest]
    #[case::one(1)]
    #[case::three(3)]
    #[case::larger_than_load(64)]
    #[tokio::test]
    async fn oldest_items_fill_each_batch(#[case] batch_size: usize) {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, batch_size, usize::MAX);

        let completions = submit_all(&producer, 1..=7);
        for completion in completions {
            outcome(completion).await.unwrap();
        }

        let expected: Vec<Vec<u32>> = (1..=7u32)
            .collect::<Vec<_>>()
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        assert_eq!(publisher.batches(), expected);
    }

    #[tokio::test]
    async fn partial_batch_is_sent_without_waiting() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, 10, usize::MAX);

        let completions = submit_all(&producer, 1..=3);
        for completion in completions {
            outcome(completion).await.unwrap();
        }
        assert_eq!(publisher.batches(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn stop_cancels_everything_behind_the_in_flight_batch() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Hang));
        let producer = producer_with(&publisher, 5, usize::MAX);

        let mut in_flight = submit_all(&producer, 1..=100);
        let queued = in_flight.split_off(5);
        timeout(WAIT, publisher.wait_for_calls(1)).await.unwrap();

        let stopping = producer.stop();
        assert_eq!(producer.state(), ProducerState::Stopping);

        for completion in queued {
            assert!(matches!(outcome(completion).await, Err(DeliveryError::Canceled)));
        }
        // in-flight のバッチはキャンセルされない（publisher が返るまで待つ）
        for completion in in_flight {
            assert!(timeout(Duration::from_millis(10), completion).await.is_err());
        }
        assert!(timeout(SHORT, stopping).await.is_err());

        let counts = producer.counts();
        assert_eq!(counts.canceled, 95);
        assert_eq!(counts.in_flight, 5);
        assert_eq!(counts.queued, 0);
        assert_eq!(publisher.batches(), vec![vec![1, 2, 3, 4, 5]]);
    }

    #[tokio::test]
    async fn publish_failure_fails_every_pending_item() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::FailAfter(
            Duration::from_millis(10),
        )));
        let producer = producer_with(&publisher, 5, usize::MAX);

        let completions = submit_all(&producer, 1..=100);
        let mut failed_batches = Vec::new();
        for completion in completions {
            let err = outcome(completion).await.unwrap_err();
            assert!(!err.is_canceled());
            failed_batches.push(publish_error_batch(&err));
        }

        // 全件が最初のバッチの同じエラーを受け取る
        assert!(failed_batches.iter().all(|id| *id == failed_batches[0]));
        assert_eq!(publisher.calls(), 1);
        assert_eq!(producer.state(), ProducerState::Faulted);

        let counts = producer.counts();
        assert_eq!(counts.failed, 100);
        assert_eq!(counts.succeeded, 0);
        assert_eq!(counts.canceled, 0);
    }

    #[tokio::test]
    async fn first_failure_is_distinguishable_from_faulted_producer() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Fail));
        let producer = producer_with(&publisher, 5, usize::MAX);

        let first = producer.submit(1).unwrap();
        let err = outcome(first).await.unwrap_err();
        assert!(err.cause().unwrap().downcast_ref::<InMemoryPublishError>().is_some());
        assert!(err.to_string().contains("in-memory publisher rejected"));

        let second = producer.submit(2).unwrap_err();
        assert_eq!(second.into_payload(), 2);
        assert_eq!(
            producer.submit(3).unwrap_err().into_error(),
            ProducerError::ProducerStopped {
                state: ProducerState::Faulted
            }
        );
    }

    #[tokio::test]
    async fn stopped_producer_rejects_new_work() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, 4, usize::MAX);

        let completions = submit_all(&producer, 1..=6);
        for completion in completions {
            outcome(completion).await.unwrap();
        }
        timeout(WAIT, producer.stop()).await.unwrap();

        assert_eq!(producer.state(), ProducerState::Stopped);
        assert_eq!(
            *producer.submit(7).unwrap_err().error(),
            ProducerError::ProducerStopped {
                state: ProducerState::Stopped
            }
        );
        assert_eq!(producer.counts().rejected, 1);
    }

    #[tokio::test]
    async fn full_queue_rejects_synchronously() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Hang));
        let producer = producer_with(&publisher, 1, 10);

        // current_thread runtime: dispatch loop は await するまで動かない
        let results: Vec<_> = (1..=20).map(|v| producer.submit(v)).collect();
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let rejected: Vec<_> = results.into_iter().filter_map(Result::err).collect();

        assert_eq!(accepted, 10);
        assert_eq!(rejected.len(), 10);
        assert!(
            rejected
                .iter()
                .all(|e| *e.error() == ProducerError::QueueFull { capacity: 10 })
        );
        // 拒否された payload はそのまま返ってくる
        let returned: Vec<u32> = rejected.into_iter().map(SubmitError::into_payload).collect();
        assert_eq!(returned, (11..=20).collect::<Vec<_>>());
        assert_eq!(producer.counts().rejected, 10);

        // loop が 1 件取り出すと 1 枠空く
        timeout(WAIT, publisher.wait_for_calls(1)).await.unwrap();
        assert!(producer.submit(21).is_ok());
        assert!(producer.submit(22).is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, 4, usize::MAX);

        timeout(WAIT, async {
            tokio::join!(producer.stop(), producer.stop());
            producer.stop().await;
        })
        .await
        .unwrap();
        assert_eq!(producer.state(), ProducerState::Stopped);
    }

    #[tokio::test]
    async fn stop_after_fault_keeps_faulted() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Fail));
        let producer = producer_with(&publisher, 4, usize::MAX);

        let completion = producer.submit(1).unwrap();
        outcome(completion).await.unwrap_err();

        timeout(WAIT, producer.stop()).await.unwrap();
        assert_eq!(producer.state(), ProducerState::Faulted);
    }

    #[tokio::test]
    async fn failure_while_stopping_still_ends_stopped() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::FailAfter(
            Duration::from_millis(20),
        )));
        let producer = producer_with(&publisher, 2, usize::MAX);

        let mut in_flight = submit_all(&producer, 1..=4);
        let queued = in_flight.split_off(2);
        timeout(WAIT, publisher.wait_for_calls(1)).await.unwrap();

        let stopping = producer.stop();
        for completion in queued {
            assert!(outcome(completion).await.unwrap_err().is_canceled());
        }
        for completion in in_flight {
            let err = outcome(completion).await.unwrap_err();
            assert!(err.cause().is_some());
        }
        timeout(WAIT, stopping).await.unwrap();
        assert_eq!(producer.state(), ProducerState::Stopped);
    }

    #[tokio::test]
    async fn in_flight_batch_still_succeeds_after_stop() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Delay(
            Duration::from_millis(50),
        )));
        let producer = producer_with(&publisher, 5, usize::MAX);

        let mut in_flight = submit_all(&producer, 1..=20);
        let queued = in_flight.split_off(5);
        timeout(WAIT, publisher.wait_for_calls(1)).await.unwrap();

        let stopping = producer.stop();
        for completion in queued {
            assert!(outcome(completion).await.unwrap_err().is_canceled());
        }
        for completion in in_flight {
            outcome(completion).await.unwrap();
        }
        timeout(WAIT, stopping).await.unwrap();

        assert_eq!(producer.state(), ProducerState::Stopped);
        assert_eq!(publisher.batches(), vec![vec![1, 2, 3, 4, 5]]);
        let counts = producer.counts();
        assert_eq!(counts.succeeded, 5);
        assert_eq!(counts.canceled, 15);
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.resolved(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn capacity_holds_under_concurrent_submitters() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Hang));
        let producer = Arc::new(producer_with(&publisher, 1, 10));

        let mut tasks = Vec::new();
        for submitter in 0..8u32 {
            let producer = Arc::clone(&producer);
            tasks.push(tokio::spawn(async move {
                let mut accepted = Vec::new();
                for i in 0..10u32 {
                    match producer.submit(submitter * 100 + i) {
                        Ok(completion) => accepted.push(completion),
                        Err(err) => assert!(err.is_queue_full()),
                    }
                }
                accepted
            }));
        }
        let mut accepted = Vec::new();
        for task in tasks {
            accepted.extend(task.await.unwrap());
        }

        // 10 件がキュー、最大 1 件が in-flight（Hang なので以降は取り出されない）
        assert!((10..=11).contains(&accepted.len()), "accepted {}", accepted.len());
        let counts = producer.counts();
        assert!(counts.queued <= 10);
        assert_eq!(counts.queued + counts.in_flight, accepted.len());
        assert_eq!(counts.rejected, 80 - accepted.len());

        // stop はキューに残った分をその場で cancel する（in-flight の 1 件は Hang のまま）
        timeout(WAIT, publisher.wait_for_calls(1)).await.unwrap();
        let _stopping = producer.stop();
        assert_eq!(producer.counts().canceled, accepted.len() - 1);
    }

    #[tokio::test]
    async fn publisher_panic_faults_the_producer() {
        let publisher = Arc::new(PanickingPublisher);
        let producer = ProducerBuilder::<u32>::new(publisher)
            .topic("orders")
            .batch_size(2)
            .build()
            .unwrap();

        let completions = submit_all(&producer, 1..=5);
        for completion in completions {
            let err = outcome(completion).await.unwrap_err();
            assert!(!err.is_canceled());
            let panicked = err
                .cause()
                .and_then(|cause| cause.downcast_ref::<PublisherPanicked>())
                .expect("expected a publisher panic");
            assert!(panicked.message.contains("panicked"));
        }

        assert_eq!(producer.state(), ProducerState::Faulted);
        let counts = producer.counts();
        assert_eq!(counts.failed, 5);
        assert_eq!(counts.canceled, 0);
        assert_eq!(counts.in_flight, 0);
        assert!(producer.submit(6).is_err());
    }

    #[tokio::test]
    async fn dropping_the_producer_cancels_queued_items() {
        let publisher = Arc::new(InMemoryPublisher::with_behavior(PublishBehavior::Hang));
        let producer = producer_with(&publisher, 1, usize::MAX);

        let mut completions = submit_all(&producer, 1..=3);
        timeout(WAIT, publisher.wait_for_calls(1)).await.unwrap();
        drop(producer);

        for completion in completions.split_off(1) {
            assert!(outcome(completion).await.unwrap_err().is_canceled());
        }
    }

    #[tokio::test]
    async fn idle_producer_stops_promptly() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, 4, usize::MAX);
        let mut states = producer.subscribe_state();

        timeout(WAIT, producer.stop()).await.unwrap();

        assert_eq!(*states.borrow_and_update(), ProducerState::Stopped);
        assert_eq!(publisher.calls(), 0);
    }

    #[tokio::test]
    async fn counts_track_outcomes() {
        let publisher = Arc::new(InMemoryPublisher::new());
        let producer = producer_with(&publisher, 2, usize::MAX);

        let completions = submit_all(&producer, 1..=5);
        for completion in completions {
            outcome(completion).await.unwrap();
        }

        let status = producer.status();
        assert_eq!(status.state, ProducerState::Running);
        assert_eq!(status.topic, "orders");
        assert_eq!(status.counts.succeeded, 5);
        assert_eq!(status.counts.batches, 3);
        assert_eq!(status.counts.queued, 0);
        assert_eq!(status.counts.in_flight, 0);
        assert!(status.counts.last_dispatch_at.is_some());
        assert_eq!(status.counts.resolved(), 5);
    }
}
