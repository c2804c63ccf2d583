//! Priority queue with FIFO tie-breaking.
//!
//! Shared by the admission controller and the worker pool. Items are ordered
//! by priority (higher first); items of equal priority leave in arrival
//! order. Arrival order is tracked with a monotonically increasing sequence
//! number, so ordering never depends on clock resolution.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Priority of a request. Higher values are served first.
pub type Priority = i32;

struct QueueEntry<T> {
    priority: Priority,
    sequence: u64,
    enqueued_at: Instant,
    item: T,
}

impl<T> PartialEq for QueueEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl<T> Eq for QueueEntry<T> {}

impl<T> Ord for QueueEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (earlier) first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<T> PartialOrd for QueueEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A queued item together with its bookkeeping.
#[derive(Debug)]
pub struct Dequeued<T> {
    /// The item.
    pub item: T,
    /// Its priority.
    pub priority: Priority,
    /// When it was enqueued.
    pub enqueued_at: Instant,
}

/// Priority-ordered queue, stable for equal priorities.
///
/// Not synchronized; owners wrap it in a lock.
pub struct PriorityQueue<T> {
    heap: BinaryHeap<QueueEntry<T>>,
    next_sequence: u64,
}

impl<T> std::fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl<T> PriorityQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    /// Add an item.
    pub fn push(&mut self, priority: Priority, item: T) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueEntry {
            priority,
            sequence,
            enqueued_at: Instant::now(),
            item,
        });
    }

    /// Put back an item that was popped but could not be handled, keeping
    /// its original position among equal priorities.
    pub fn requeue(&mut self, dequeued: Dequeued<T>, sequence: u64) {
        self.heap.push(QueueEntry {
            priority: dequeued.priority,
            sequence,
            enqueued_at: dequeued.enqueued_at,
            item: dequeued.item,
        });
    }

    /// Remove the highest-priority, earliest item.
    pub fn pop(&mut self) -> Option<Dequeued<T>> {
        self.pop_with_sequence().map(|(dequeued, _)| dequeued)
    }

    /// Like [`pop`](Self::pop), also returning the arrival sequence number.
    pub fn pop_with_sequence(&mut self) -> Option<(Dequeued<T>, u64)> {
        self.heap.pop().map(|entry| {
            (
                Dequeued {
                    item: entry.item,
                    priority: entry.priority,
                    enqueued_at: entry.enqueued_at,
                },
                entry.sequence,
            )
        })
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// How long the oldest item has been waiting.
    ///
    /// O(n); intended for statistics, not the request path.
    pub fn oldest_age(&self) -> Option<Duration> {
        self.heap
            .iter()
            .min_by_key(|entry| entry.sequence)
            .map(|entry| entry.enqueued_at.elapsed())
    }

    /// Keep only the items for which `keep` returns true.
    ///
    /// Returns how many items were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|entry| keep(&entry.item));
        before - self.heap.len()
    }

    /// Remove and return every item in dequeue order.
    pub fn drain_ordered(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            items.push(entry.item);
        }
        items
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_for_equal_priority() {
        let mut queue = PriorityQueue::new();
        for i in 0..5 {
            queue.push(0, i);
        }
        let order: Vec<i32> = std::iter::from_fn(|| queue.pop().map(|d| d.item)).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_priority_then_arrival() {
        let mut queue = PriorityQueue::new();
        queue.push(0, "low-1");
        queue.push(5, "high-1");
        queue.push(0, "low-2");
        queue.push(5, "high-2");
        queue.push(-3, "negative");

        assert_eq!(
            queue.drain_ordered(),
            vec!["high-1", "high-2", "low-1", "low-2", "negative"]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retain_keeps_order() {
        let mut queue = PriorityQueue::new();
        for i in 0..6 {
            queue.push(i % 2, i);
        }
        assert_eq!(queue.retain(|item| item % 3 != 0), 2);
        assert_eq!(queue.drain_ordered(), vec![1, 5, 2, 4]);
    }

    #[test]
    fn test_requeue_keeps_position() {
        let mut queue = PriorityQueue::new();
        queue.push(1, "first");
        queue.push(1, "second");

        let (first, sequence) = queue.pop_with_sequence().unwrap();
        assert_eq!(first.item, "first");
        queue.requeue(first, sequence);

        assert_eq!(queue.pop().unwrap().item, "first");
        assert_eq!(queue.pop().unwrap().item, "second");
    }

    #[test]
    fn test_oldest_age() {
        let mut queue: PriorityQueue<()> = PriorityQueue::new();
        assert!(queue.oldest_age().is_none());

        queue.push(0, ());
        std::thread::sleep(Duration::from_millis(10));
        queue.push(10, ());

        let age = queue.oldest_age().unwrap();
        assert!(age >= Duration::from_millis(10));
        assert_eq!(queue.len(), 2);
    }
}
