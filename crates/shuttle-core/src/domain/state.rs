//! ProducerState - producer のライフサイクル状態

use std::fmt;

use serde::{Deserialize, Serialize};

/// ProducerState は producer 全体の状態を表現
///
/// # 状態遷移
/// - Running -> Stopping -> Stopped （stop() による graceful shutdown）
/// - Running -> Faulted （publisher の失敗）
///
/// 遷移は単調で、Stopped / Faulted から Running へは戻らない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerState {
    /// 受付中。dispatch loop も稼働中。
    Running,

    /// stop() 済み。in-flight バッチの完了待ち。
    Stopping,

    /// dispatch loop 終了済み。
    Stopped,

    /// publisher の失敗で停止。
    Faulted,
}

impl ProducerState {
    /// Can new items be admitted?
    pub fn admits(self) -> bool {
        matches!(self, ProducerState::Running)
    }

    /// Is this a terminal state (dispatch loop has exited)?
    pub fn is_terminal(self) -> bool {
        matches!(self, ProducerState::Stopped | ProducerState::Faulted)
    }

    /// Is `self -> next` a legal transition?
    ///
    /// `Running -> Stopped` skips `Stopping`. Only the dispatch loop's exit
    /// guard takes it, when the loop task ends without a stop (runtime
    /// shutdown aborting it).
    pub fn can_transition_to(self, next: ProducerState) -> bool {
        use ProducerState::*;
        matches!(
            (self, next),
            (Running, Stopping) | (Running, Faulted) | (Running, Stopped) | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProducerState::Running => "running",
            ProducerState::Stopping => "stopping",
            ProducerState::Stopped => "stopped",
            ProducerState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}
