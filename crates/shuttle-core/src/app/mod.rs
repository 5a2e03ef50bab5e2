//! App - アプリケーション層
//!
//! queue と ports を組み合わせて batching producer を実装します。
//!
//! # 主要コンポーネント
//! - **ProducerBuilder**: 設定の検証と dispatch loop の起動
//! - **BatchProducer**: submit / stop の表面
//! - **DispatchLoop**: キュー → バッチ → publisher の唯一のワーカー
//! - **Completion**: 1 メッセージ分の結果スロット
//! - **Status**: カウンタのスナップショット

pub mod builder;
pub mod completion;
pub mod config;
mod dispatch_loop;
pub mod producer;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ProducerBuilder};
pub use self::completion::Completion;
pub use self::config::{DEFAULT_MAX_QUEUE_SIZE, ProducerConfig};
pub use self::producer::BatchProducer;
pub use self::status::{ProducerCounts, ProducerStatus};
