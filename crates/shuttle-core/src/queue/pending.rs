//! Bounded FIFO of accepted-but-not-dispatched items.

use std::collections::VecDeque;

/// Bounded FIFO queue.
///
/// Plain data structure: locking and wake-ups belong to the owner
/// (`app::producer`). Capacity is fixed at construction.
#[derive(Debug)]
pub struct PendingQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> PendingQueue<T> {
    /// `capacity` が大きい（既定 usize::MAX）場合に備えて事前確保はしない。
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append to the tail. Returns the item back when the queue is full.
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Take up to `max` items from the head, oldest first.
    pub fn drain_batch(&mut self, max: usize) -> Vec<T> {
        let n = max.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Take everything, oldest first.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
