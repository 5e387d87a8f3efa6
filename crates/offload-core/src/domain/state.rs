//! Task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Task state.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed
/// - Pending -> Cancelled (explicit cancel, or shutdown before a worker got to it)
///
/// States only advance; a terminal state never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, waiting for a worker.
    Pending,

    /// Currently being executed by a worker.
    Running,

    /// Handler returned a value.
    Completed,

    /// Handler returned an error or panicked.
    Failed,

    /// Removed from the queue before it ran.
    Cancelled,
}

impl TaskState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed) | (Running, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start(TaskState::Pending, TaskState::Running)]
    #[case::cancel(TaskState::Pending, TaskState::Cancelled)]
    #[case::complete(TaskState::Running, TaskState::Completed)]
    #[case::fail(TaskState::Running, TaskState::Failed)]
    fn forward_transitions_are_allowed(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_running(TaskState::Pending, TaskState::Completed)]
    #[case::cancel_running(TaskState::Running, TaskState::Cancelled)]
    #[case::back_to_pending(TaskState::Running, TaskState::Pending)]
    #[case::rerun_completed(TaskState::Completed, TaskState::Running)]
    #[case::revive_failed(TaskState::Failed, TaskState::Pending)]
    #[case::uncancel(TaskState::Cancelled, TaskState::Pending)]
    #[case::self_loop(TaskState::Running, TaskState::Running)]
    fn other_transitions_are_rejected(#[case] from: TaskState, #[case] to: TaskState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&TaskState::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
