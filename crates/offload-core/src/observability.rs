use serde::{Deserialize, Serialize};

use crate::domain::TaskState;

/// Number of registry records per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn record(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Completed => self.completed += 1,
            TaskState::Failed => self.failed += 1,
            TaskState::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    /// Tasks that have not reached a terminal state yet.
    pub fn in_flight(&self) -> usize {
        self.pending + self.running
    }
}

impl FromIterator<TaskState> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = TaskState>>(iter: I) -> Self {
        let mut counts = TaskCounts::default();
        for state in iter {
            counts.record(state);
        }
        counts
    }
}
