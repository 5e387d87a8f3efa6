//! Task registry: id -> record and id -> result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{TaskArgs, TaskId, TaskRecord, TaskState, TaskStatus};
use crate::error::EngineError;
use crate::handler::TaskHandler;
use crate::observability::TaskCounts;

#[derive(Default)]
struct RegistryState {
    records: HashMap<TaskId, TaskRecord>,
    results: HashMap<TaskId, Value>,
    closed: bool,
}

/// What a worker needs to run a task it just moved to Running.
pub struct RunTicket {
    pub id: TaskId,
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub args: TaskArgs,
}

/// Both maps sit behind one mutex so a poller never sees a record and its
/// result disagree. Workers write, submitters and pollers read.
///
/// Records are kept until `purge_finished` drops them; nothing else evicts.
#[derive(Default)]
pub struct TaskRegistry {
    state: Mutex<RegistryState>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a Pending record and run `enqueue` for it, both under the
    /// registry lock. Fails once `close` has run, so nothing can be added
    /// behind the final sweep of Pending tasks.
    pub fn insert<Q>(&self, record: TaskRecord, enqueue: Q) -> Result<(), EngineError>
    where
        Q: FnOnce(&TaskRecord),
    {
        let mut state = self.lock();
        if state.closed {
            return Err(EngineError::NotAccepting);
        }
        enqueue(&record);
        state.records.insert(record.id, record);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.lock().records.get(&id).map(TaskRecord::status)
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.lock().records.get(&id).map(|record| record.state)
    }

    pub fn result(&self, id: TaskId) -> Option<Value> {
        self.lock().results.get(&id).cloned()
    }

    /// Move a dequeued task to Running.
    ///
    /// `Ok(None)` means the task was cancelled while it sat in the queue and
    /// must be skipped.
    pub fn begin_run(&self, id: TaskId) -> Result<Option<RunTicket>, EngineError> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        if record.state == TaskState::Cancelled {
            return Ok(None);
        }
        record.start()?;
        Ok(Some(RunTicket {
            id,
            name: record.name.clone(),
            handler: Arc::clone(&record.handler),
            args: record.args.clone(),
        }))
    }

    pub fn complete(&self, id: TaskId, result: Value) -> Result<(), EngineError> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        record.complete(result.clone())?;
        state.results.insert(id, result);
        Ok(())
    }

    pub fn fail(&self, id: TaskId, error: impl Into<String>) -> Result<(), EngineError> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        record.fail(error)
    }

    /// Cancel a task that has not started.
    pub fn cancel(&self, id: TaskId, reason: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&id)
            .ok_or(EngineError::NotFound(id))?;
        if record.state != TaskState::Pending {
            return Err(EngineError::NotCancellable {
                id,
                state: record.state,
            });
        }
        record.cancel(reason)
    }

    /// Refuse further inserts and cancel every task still Pending.
    /// Returns the ids that were cancelled.
    pub fn close(&self, reason: &str) -> Vec<TaskId> {
        let mut state = self.lock();
        state.closed = true;
        let mut cancelled = Vec::new();
        for record in state.records.values_mut() {
            if record.state == TaskState::Pending && record.cancel(reason).is_ok() {
                cancelled.push(record.id);
            }
        }
        cancelled
    }

    pub fn counts(&self) -> TaskCounts {
        self.lock()
            .records
            .values()
            .map(|record| record.state)
            .collect()
    }

    /// Drop terminal records (and their results) that finished before `cutoff`.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let stale: Vec<TaskId> = state
            .records
            .values()
            .filter(|record| {
                record.state.is_terminal()
                    && record.completed_at.is_some_and(|done| done < cutoff)
            })
            .map(|record| record.id)
            .collect();
        for id in &stale {
            state.records.remove(id);
            state.results.remove(id);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
