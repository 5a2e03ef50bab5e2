use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::info;

use shuttle_core::{
    Ack, Batch, BatchProducer, BatchPublisher, BoxError, DeliveryError, ProducerConfig,
    ProducerError,
};

const SUBMITTERS: u32 = 4;
const MESSAGES_PER_SUBMITTER: u32 = 250;

#[derive(Debug, Serialize)]
struct DemoMessage {
    submitter: u32,
    seq: u32,
    body: String,
}

/// 遅延がランダムな publisher（本物の broker の代わり）
///
/// バッチを JSON にして「送った」バイト数を数えるだけ。
#[derive(Default)]
struct JitterPublisher {
    bytes_sent: AtomicUsize,
}

#[async_trait]
impl BatchPublisher<DemoMessage> for JitterPublisher {
    async fn publish_batch(&self, topic: &str, batch: &Batch<DemoMessage>) -> Result<Ack, BoxError> {
        let wire = serde_json::to_vec(batch.payloads())?;
        let delay = rand::thread_rng().gen_range(1..=5u64);
        sleep(Duration::from_millis(delay)).await;

        self.bytes_sent.fetch_add(wire.len(), Ordering::Relaxed);
        info!(topic, batch_id = %batch.id(), size = batch.len(), bytes = wire.len(), "sent batch");
        Ok(Ack::new(batch.len()))
    }
}

fn load_config() -> Result<ProducerConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(ProducerConfig::from_json(&json)?)
        }
        None => Ok(ProducerConfig::new("demo.events", 16).with_max_queue_size(64)),
    }
}

/// submitter：QueueFull のときは少し待ってから再投入（caller 側の backpressure）
async fn submitter(
    id: u32,
    producer: Arc<BatchProducer<DemoMessage>>,
) -> Result<(usize, usize), ProducerError> {
    let mut completions = Vec::with_capacity(MESSAGES_PER_SUBMITTER as usize);
    let mut retries = 0;

    for seq in 0..MESSAGES_PER_SUBMITTER {
        let mut msg = DemoMessage {
            submitter: id,
            seq,
            body: format!("hello from {id}/{seq}"),
        };
        loop {
            match producer.submit(msg) {
                Ok(completion) => {
                    completions.push(completion);
                    break;
                }
                // 拒否された message は error から取り戻して再投入
                Err(e) if e.is_queue_full() => {
                    msg = e.into_payload();
                    retries += 1;
                    sleep(Duration::from_millis(2)).await;
                }
                Err(e) => return Err(e.into_error()),
            }
        }
    }

    let mut delivered = 0;
    for completion in completions {
        match completion.await {
            Ok(()) => delivered += 1,
            Err(DeliveryError::Canceled) => {}
            Err(e) => tracing::warn!(submitter = id, error = %e, "delivery failed"),
        }
    }
    Ok((delivered, retries))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // (A) 設定と publisher を用意
    let config = load_config()?;
    let publisher = Arc::new(JitterPublisher::default());

    // (B) producer を起動（dispatch loop が spawn される）
    let producer = Arc::new(BatchProducer::<DemoMessage>::spawn(
        config,
        publisher.clone(),
    )?);

    // (C) 複数の submitter から同時に投入
    let mut tasks = Vec::new();
    for id in 0..SUBMITTERS {
        tasks.push(tokio::spawn(submitter(id, Arc::clone(&producer))));
    }

    let mut delivered = 0;
    let mut retries = 0;
    for task in tasks {
        let (d, r) = task.await??;
        delivered += d;
        retries += r;
    }
    info!(delivered, retries, "all submitters finished");

    // (D) graceful shutdown
    producer.stop().await;

    println!("{}", serde_json::to_string_pretty(&producer.status())?);
    println!("bytes sent: {}", publisher.bytes_sent.load(Ordering::Relaxed));
    Ok(())
}
