//! Completion - 1 メッセージ分の結果スロット
//!
//! # 学習ポイント
//! - oneshot チャネルで「一度だけ書ける」結果を表現
//! - `Resolver` は self を消費するので、二重解決は型レベルで起きない
//! - `Resolver` が解決されずに drop されたら、受け手には Canceled が届く

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::domain::{DeliveryError, SharedError};

type Outcome = Result<(), DeliveryError>;

/// Create a linked resolver / completion pair.
pub(crate) fn completion_pair() -> (Resolver, Completion) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Completion { rx })
}

/// Caller side: resolves to the outcome of one submitted message.
///
/// ```ignore
/// let completion = producer.submit(msg)?;
/// completion.await?;
/// ```
#[must_use = "a Completion does nothing unless awaited"]
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Outcome>,
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // sender が解決せずに消えた = 一度も publisher に届いていない
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DeliveryError::Canceled)))
    }
}

/// Producer side of a completion. Consumed by whichever outcome comes first.
#[derive(Debug)]
pub(crate) struct Resolver {
    tx: oneshot::Sender<Outcome>,
}

impl Resolver {
    pub(crate) fn succeed(self) {
        // ignore send error: caller may have dropped its Completion
        let _ = self.tx.send(Ok(()));
    }

    pub(crate) fn fail(self, err: SharedError) {
        let _ = self.tx.send(Err(DeliveryError::Publish(err)));
    }

    pub(crate) fn cancel(self) {
        let _ = self.tx.send(Err(DeliveryError::Canceled));
    }
}
