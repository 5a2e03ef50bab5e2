//! Queue module: the bounded pending-item queue.

mod pending;

pub use pending::PendingQueue;
