//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryPublisher**: バッチを記録するだけの publisher
//!
//! 本番用の publisher（broker クライアント）は別クレートに置き、
//! `BatchPublisher` を実装するだけで差し替えます。

pub mod inmem_publisher;

pub use self::inmem_publisher::{InMemoryPublishError, InMemoryPublisher, PublishBehavior};
