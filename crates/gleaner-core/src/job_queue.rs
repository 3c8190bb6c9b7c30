use std::cmp::Ordering;
use std::collections::BinaryHeap;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    seq: u64,
    job_id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then earlier insertion.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory priority queue of job ids.
///
/// Ordered by priority descending; equal priorities dequeue in insertion
/// order. Every `push` takes a fresh sequence number, so a requeued job sorts
/// after jobs already waiting at the same priority.
#[derive(Debug, Default)]
pub struct JobQueue {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, job_id: Uuid, priority: i32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            priority,
            seq,
            job_id,
        });
    }

    pub fn pop(&mut self) -> Option<Uuid> {
        self.heap.pop().map(|entry| entry.job_id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Queued ids in dequeue order.
    #[cfg(test)]
    fn ordered_ids(&self) -> Vec<Uuid> {
        let mut entries: Vec<_> = self.heap.iter().copied().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|entry| entry.job_id).collect()
    }
}
