//! Ports - 抽象化レイヤー
//!
//! producer が外部システムに触れる唯一の境界です。
//! 実装（本番の broker クライアント、開発用の InMemoryPublisher）は
//! この trait を満たすだけで差し替えられます。

pub mod publisher;

pub use self::publisher::{Ack, BatchPublisher};
