//! Batch - publisher に 1 回で渡すメッセージのまとまり

use chrono::{DateTime, Utc};

use super::BatchId;

/// Ordered group of payloads handed to the publisher in one call.
///
/// Built by the dispatch loop in admission order and never mutated after
/// the publisher sees it (the publisher only gets `&Batch<M>`).
#[derive(Debug, Clone)]
pub struct Batch<M> {
    id: BatchId,
    created_at: DateTime<Utc>,
    payloads: Vec<M>,
}

impl<M> Batch<M> {
    pub fn new(payloads: Vec<M>) -> Self {
        Self {
            id: BatchId::generate(),
            created_at: Utc::now(),
            payloads,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    /// When the dispatch loop assembled this batch.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payloads(&self) -> &[M] {
        &self.payloads
    }

    pub fn iter(&self) -> std::slice::Iter<'_, M> {
        self.payloads.iter()
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}
