//! Engine - the object the host application owns and injects.
//!
//! Lifecycle: `Engine::new` at startup, `start` once a tokio runtime is up,
//! `shutdown` when the application stops. Submitting is allowed before
//! `start`; tasks simply wait in the queue until workers exist.
//!
//! Completion is poll-only: `submit` returns an id and nothing is signalled
//! when the task finishes. A submitter that never calls `status` never learns
//! that its task failed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::EngineSettings;
use crate::domain::{TaskArgs, TaskId, TaskRecord, TaskStatus};
use crate::error::EngineError;
use crate::handler::TaskHandler;
use crate::observability::TaskCounts;
use crate::queue::TaskQueue;
use crate::registry::TaskRegistry;
use crate::worker::WorkerGroup;

const SHUTDOWN_REASON: &str = "engine shut down before the task ran";
const CANCEL_REASON: &str = "cancelled before it started";

/// A task waiting to be submitted.
///
/// ```ignore
/// let id = engine.submit(
///     TaskRequest::new("employee_stats", handler)
///         .kwarg("year", 2024)
///         .priority(2),
/// )?;
/// ```
pub struct TaskRequest {
    name: String,
    handler: Arc<dyn TaskHandler>,
    args: TaskArgs,
    priority: Option<i32>,
}

impl TaskRequest {
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            args: TaskArgs::new(),
            priority: None,
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value);
        self
    }

    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        for value in values {
            self.args.push(value);
        }
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name, value);
        self
    }

    /// Replace all arguments at once.
    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    /// Higher runs first. Defaults to the engine's `default_priority`.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }
}

impl fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRequest")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// What `shutdown` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers still running a task when their join timeout ran out.
    pub unfinished_workers: usize,
    /// Pending tasks that were cancelled because no worker took them.
    pub cancelled_tasks: usize,
}

pub struct Engine {
    settings: EngineSettings,
    queue: Arc<TaskQueue>,
    registry: Arc<TaskRegistry>,
    accepting: AtomicBool,
    workers: Mutex<Option<WorkerGroup>>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            queue: Arc::new(TaskQueue::new()),
            registry: Arc::new(TaskRegistry::new()),
            accepting: AtomicBool::new(true),
            workers: Mutex::new(None),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineSettings::default())
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn workers(&self) -> MutexGuard<'_, Option<WorkerGroup>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker pool. Must be called from within a tokio runtime.
    ///
    /// Settings are validated here, so an engine built from hand-written
    /// `EngineSettings` cannot start zero workers or spin on a zero poll.
    pub fn start(&self) -> Result<(), EngineError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::NotAccepting);
        }
        self.settings.validate()?;
        let mut workers = self.workers();
        if workers.is_some() {
            return Err(EngineError::AlreadyStarted);
        }
        *workers = Some(WorkerGroup::spawn(
            self.settings.workers,
            Arc::clone(&self.queue),
            Arc::clone(&self.registry),
            self.settings.poll_interval,
        ));
        Ok(())
    }

    /// Number of running workers (0 before `start` and after `shutdown`).
    pub fn worker_count(&self) -> usize {
        self.workers().as_ref().map_or(0, WorkerGroup::len)
    }

    /// Register a PENDING record and enqueue it. Never waits for a worker.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId, EngineError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(EngineError::NotAccepting);
        }

        let id = TaskId::generate();
        let priority = request.priority.unwrap_or(self.settings.default_priority);
        let record = TaskRecord::new(id, request.name, request.handler, request.args, priority);
        let name = record.name.clone();

        // Enqueued under the registry lock: a concurrent `shutdown` either
        // sees this record Pending and cancels it, or rejects the insert.
        self.registry
            .insert(record, |record| self.queue.push(record.id, record.priority))?;
        info!(task_id = %id, name = %name, priority, "task submitted");
        Ok(id)
    }

    pub fn status(&self, id: TaskId) -> Option<TaskStatus> {
        self.registry.status(id)
    }

    /// The stored result; `None` unless the task COMPLETED.
    pub fn result(&self, id: TaskId) -> Option<Value> {
        self.registry.result(id)
    }

    /// Cancel a task that no worker has picked up yet.
    pub fn cancel(&self, id: TaskId) -> Result<(), EngineError> {
        self.registry.cancel(id, CANCEL_REASON)?;
        // A worker may have popped it already; it will see Cancelled and skip.
        self.queue.remove(id);
        info!(task_id = %id, "task cancelled");
        Ok(())
    }

    pub fn counts(&self) -> TaskCounts {
        self.registry.counts()
    }

    /// Items waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Forget finished tasks whose completion is older than `older_than`.
    pub fn purge_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };
        let purged = self.registry.purge_finished(cutoff);
        if purged > 0 {
            info!(purged, "purged finished tasks");
        }
        purged
    }

    /// Stop accepting tasks, drain the queue, stop the workers.
    ///
    /// Waits at most `join_timeout` per worker. Whatever is still PENDING
    /// afterwards is marked CANCELLED.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.accepting.store(false, Ordering::Release);

        let group = self.workers().take();
        let unfinished_workers = match group {
            Some(group) => group.shutdown_and_join(self.settings.join_timeout).await,
            None => 0,
        };

        let cancelled = self.registry.close(SHUTDOWN_REASON);
        for id in &cancelled {
            self.queue.remove(*id);
        }
        if !cancelled.is_empty() {
            warn!(count = cancelled.len(), "cancelled tasks left pending at shutdown");
        }

        ShutdownReport {
            unfinished_workers,
            cancelled_tasks: cancelled.len(),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
