use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{TaskId, TaskState};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not accepting tasks (shutdown in progress or finished)")]
    NotAccepting,

    #[error("engine workers are already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task {id} cannot be cancelled in state {state}")]
    NotCancellable { id: TaskId, state: TaskState },

    #[error("task {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },
}

/// The failure a task handler reports.
///
/// Only the message survives: it becomes the `error` of the FAILED record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json: {err}"))
    }
}
