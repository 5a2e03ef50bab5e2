//! shuttle-core
//!
//! Batching message producer: many concurrent callers submit one message
//! each, a single dispatch loop sends them to a batch publisher in bounded,
//! FIFO-ordered batches, and every caller gets exactly one outcome back.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, batch, state, errors）
//! - **ports**: 抽象化レイヤー（BatchPublisher）
//! - **queue**: 上限付き FIFO（PendingQueue）
//! - **app**: producer 本体（builder, producer, dispatch loop, completion, status）
//! - **impls**: 開発用の実装（InMemoryPublisher）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{
    BatchProducer, BuildError, Completion, ProducerBuilder, ProducerConfig, ProducerCounts,
    ProducerStatus,
};
pub use domain::{
    Batch, BoxError, DeliveryError, ProducerError, ProducerState, PublisherPanicked, SubmitError,
};
pub use ports::{Ack, BatchPublisher};
