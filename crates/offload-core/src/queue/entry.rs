//! Heap entries and their ordering.

use std::cmp::Ordering;

use crate::domain::TaskId;

/// What a worker receives from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItem {
    Task(TaskId),

    /// Tells the worker that receives it to exit.
    Shutdown,
}

/// Real work always sorts ahead of shutdown sentinels, so a sentinel is only
/// handed out once everything queued before it has been taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
    Shutdown,
    Work,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct QueueEntry {
    lane: Lane,
    priority: i32,
    seq: u64,
    pub(super) item: QueueItem,
}

impl QueueEntry {
    pub(super) fn task(id: TaskId, priority: i32, seq: u64) -> Self {
        Self {
            lane: Lane::Work,
            priority,
            seq,
            item: QueueItem::Task(id),
        }
    }

    pub(super) fn shutdown(seq: u64) -> Self {
        Self {
            lane: Lane::Shutdown,
            priority: 0,
            seq,
            item: QueueItem::Shutdown,
        }
    }

    pub(super) fn is_task(&self, id: TaskId) -> bool {
        self.item == QueueItem::Task(id)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// BinaryHeap is a max-heap: the greatest entry is popped first.
    /// Work beats sentinels, higher priority beats lower, earlier seq beats later.
    fn cmp(&self, other: &Self) -> Ordering {
        self.lane
            .cmp(&other.lane)
            .then(self.priority.cmp(&other.priority))
            .then(other.seq.cmp(&self.seq))
    }
}
