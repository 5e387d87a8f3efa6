//! Task queue: priority/FIFO handoff between submitters and workers.

mod entry;

pub use entry::QueueItem;

use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::TaskId;
use entry::QueueEntry;

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

impl QueueState {
    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Unbounded in-memory queue.
///
/// Design:
/// - Holds `TaskId`s and shutdown sentinels only; records live in the registry.
/// - The lock is a plain `std::sync::Mutex` held only for heap operations,
///   never across an `.await`.
/// - `Notify` wakes one waiting worker per push.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a task id.
    pub fn push(&self, id: TaskId, priority: i32) {
        {
            let mut state = self.lock();
            let seq = state.allocate_seq();
            state.heap.push(QueueEntry::task(id, priority, seq));
        }
        // Notify outside the lock
        self.notify.notify_one();
    }

    /// Enqueue `count` shutdown sentinels behind all queued work.
    pub fn push_shutdown(&self, count: usize) {
        {
            let mut state = self.lock();
            for _ in 0..count {
                let seq = state.allocate_seq();
                state.heap.push(QueueEntry::shutdown(seq));
            }
        }
        for _ in 0..count {
            self.notify.notify_one();
        }
    }

    /// Take the next item without waiting.
    pub fn try_pop(&self) -> Option<QueueItem> {
        self.lock().heap.pop().map(|entry| entry.item)
    }

    /// Take the next item, waiting at most `timeout`.
    ///
    /// Returns `None` when nothing arrived in time; the caller uses that to
    /// look at its keep-running flag.
    pub async fn pop(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                // One last look: a push may have landed right at the deadline.
                return self.try_pop();
            }
        }
    }

    /// Remove a queued task. Returns whether it was still in the queue.
    pub fn remove(&self, id: TaskId) -> bool {
        let mut state = self.lock();
        let before = state.heap.len();
        state.heap.retain(|entry| !entry.is_task(id));
        state.heap.len() != before
    }

    /// Number of queued items, sentinels included.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn pop_returns_pushed_task() {
        let queue = TaskQueue::new();
        let id = TaskId::generate();
        queue.push(id, 1);

        let item = queue.pop(Duration::from_millis(100)).await;
        assert_eq!(item, Some(QueueItem::Task(id)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_times_out_on_empty_queue() {
        let queue = TaskQueue::new();
        let start = std::time::Instant::now();
        let item = queue.pop(Duration::from_millis(50)).await;
        assert_eq!(item, None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn push_wakes_waiting_pop() {
        let queue = Arc::new(TaskQueue::new());
        let id = TaskId::generate();

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.pop(Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(id, 1);

        let item = waiter.await.unwrap();
        assert_eq!(item, Some(QueueItem::Task(id)));
    }

    #[tokio::test]
    async fn sentinels_come_after_queued_work() {
        let queue = TaskQueue::new();
        let a = TaskId::generate();
        let b = TaskId::generate();
        queue.push(a, 1);
        queue.push_shutdown(2);
        queue.push(b, 1);

        assert_eq!(queue.try_pop(), Some(QueueItem::Task(a)));
        assert_eq!(queue.try_pop(), Some(QueueItem::Task(b)));
        assert_eq!(queue.try_pop(), Some(QueueItem::Shutdown));
        assert_eq!(queue.try_pop(), Some(QueueItem::Shutdown));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn remove_drops_only_the_target() {
        let queue = TaskQueue::new();
        let keep = TaskId::generate();
        let drop_me = TaskId::generate();
        queue.push(keep, 1);
        queue.push(drop_me, 1);

        assert!(queue.remove(drop_me));
        assert!(!queue.remove(drop_me));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop(), Some(QueueItem::Task(keep)));
    }
}
