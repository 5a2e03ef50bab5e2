//! Errors - エラー型と分類
//!
//! 2 種類のエラーを明確に分ける:
//! - **ProducerError**: submit() 時点の同期的な拒否（キュー満杯 / 停止済み）
//! - **DeliveryError**: Completion に非同期で届く個別メッセージの結果

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use super::{BatchId, ProducerState};

/// Publisher が返すエラー（中身は不透明なまま扱う）
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// 複数の Completion で共有される publisher のエラー
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Admission-time rejection returned synchronously from `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("pending queue is full (capacity={capacity})")]
    QueueFull { capacity: usize },

    #[error("producer is not accepting messages (state={state})")]
    ProducerStopped { state: ProducerState },
}

/// Rejected `submit`: the reason plus the caller's payload, handed back.
///
/// Like tokio's `TrySendError`, a caller that wants to retry takes the payload
/// back with `into_payload` instead of cloning it up front.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SubmitError<M> {
    error: ProducerError,
    payload: M,
}

impl<M> SubmitError<M> {
    pub(crate) fn new(error: ProducerError, payload: M) -> Self {
        Self { error, payload }
    }

    pub fn error(&self) -> &ProducerError {
        &self.error
    }

    pub fn is_queue_full(&self) -> bool {
        matches!(self.error, ProducerError::QueueFull { .. })
    }

    pub fn payload(&self) -> &M {
        &self.payload
    }

    pub fn into_payload(self) -> M {
        self.payload
    }

    pub fn into_error(self) -> ProducerError {
        self.error
    }
}

/// The publisher panicked (or its task was aborted) while publishing a batch.
///
/// Delivered to completions through `DeliveryError::Publish` like any other
/// publisher error.
#[derive(Debug, Clone, Error)]
#[error("publisher panicked while publishing {batch_id}: {message}")]
pub struct PublisherPanicked {
    pub batch_id: BatchId,
    pub message: String,
}

/// Outcome of one admitted message when it did not succeed.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The publisher's original error.
    ///
    /// The same `Arc` is handed to every item of the failing batch and to every
    /// item that was still queued when the failure happened.
    #[error(transparent)]
    Publish(SharedError),

    /// Never dispatched: the producer shut down first.
    #[error("message canceled before dispatch")]
    Canceled,
}

impl DeliveryError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, DeliveryError::Canceled)
    }

    /// The publisher's error, if this is a publish failure.
    ///
    /// `downcast_ref` on the result recovers the publisher's concrete type.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            DeliveryError::Publish(err) => Some(&**err),
            DeliveryError::Canceled => None,
        }
    }
}

/// Invalid producer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error("max_queue_size must be positive")]
    ZeroQueueSize,

    #[error("invalid config json: {0}")]
    Parse(String),
}
