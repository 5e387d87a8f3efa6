//! Task record: the unit of work and its lifecycle.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{TaskArgs, TaskId, TaskState};
use crate::error::EngineError;
use crate::handler::TaskHandler;

/// Default priority of a submitted task.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Metadata + handler for a submitted task.
///
/// Design:
/// - The registry owns records; the queue only holds `TaskId`s.
/// - All state transitions happen through the methods here, which refuse to
///   move a record backwards.
#[derive(Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub args: TaskArgs,

    /// Higher runs first; ties run in submission order.
    pub priority: i32,

    pub state: TaskState,

    /// Set only when `Completed`.
    pub result: Option<Value>,

    /// Set only when `Failed` or `Cancelled`.
    pub error: Option<String>,

    /// 0 until the task completes, then 100.
    pub progress: u8,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        args: TaskArgs,
        priority: i32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            handler,
            args,
            priority,
            state: TaskState::Pending,
            result: None,
            error: None,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn advance(&mut self, to: TaskState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Pending -> Running.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.advance(TaskState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Completed.
    pub fn complete(&mut self, result: Value) -> Result<(), EngineError> {
        self.advance(TaskState::Completed)?;
        self.result = Some(result);
        self.progress = 100;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), EngineError> {
        self.advance(TaskState::Failed)?;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Pending -> Cancelled.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), EngineError> {
        self.advance(TaskState::Cancelled)?;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            id: self.id,
            name: self.name.clone(),
            args: self.args.clone(),
            priority: self.priority,
            state: self.state,
            result: self.result.clone(),
            error: self.error.clone(),
            progress: self.progress,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("progress", &self.progress)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a task record, as returned to pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: TaskId,
    pub name: String,
    pub args: TaskArgs,
    pub priority: i32,
    pub state: TaskState,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;

    fn record() -> TaskRecord {
        let handler = handler_fn(|_args| async { Ok(json!(null)) });
        TaskRecord::new(
            TaskId::generate(),
            "noop",
            handler,
            TaskArgs::new(),
            DEFAULT_PRIORITY,
        )
    }

    #[test]
    fn new_record_is_pending() {
        let record = record();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.progress, 0);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn completing_stamps_result_and_progress() {
        let mut record = record();
        record.start().unwrap();
        assert!(record.started_at.is_some());

        record.complete(json!(4)).unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.result, Some(json!(4)));
        assert_eq!(record.progress, 100);
        assert!(record.completed_at.is_some());
        assert!(record.error.is_none());
    }

    #[test]
    fn failing_keeps_progress_at_zero() {
        let mut record = record();
        record.start().unwrap();
        record.fail("boom").unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert_eq!(record.progress, 0);
        assert!(record.result.is_none());
    }

    #[test]
    fn terminal_record_rejects_further_transitions() {
        let mut record = record();
        record.start().unwrap();
        record.complete(json!(1)).unwrap();

        let err = record.fail("late").unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: TaskState::Completed,
                to: TaskState::Failed,
                ..
            }
        ));
        assert_eq!(record.state, TaskState::Completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn running_record_cannot_be_cancelled() {
        let mut record = record();
        record.start().unwrap();
        assert!(record.cancel("too late").is_err());
        assert_eq!(record.state, TaskState::Running);
    }

    #[test]
    fn status_snapshot_mirrors_record() {
        let mut record = record();
        record.cancel("not needed").unwrap();
        let status = record.status();
        assert_eq!(status.id, record.id);
        assert_eq!(status.state, TaskState::Cancelled);
        assert_eq!(status.error.as_deref(), Some("not needed"));
        assert!(status.is_finished());
    }
}
