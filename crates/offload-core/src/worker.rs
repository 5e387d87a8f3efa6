use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::TaskId;
use crate::handler::join_error_message;
use crate::queue::{QueueItem, TaskQueue};
use crate::registry::TaskRegistry;

/// Worker group handle.
/// - `request_shutdown` flips the keep-running flag all workers watch
/// - `shutdown_and_join` also queues one sentinel per worker and waits for them
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    queue: Arc<TaskQueue>,
    joins: Vec<(usize, JoinHandle<()>)>,
}

impl WorkerGroup {
    /// Spawn `n` workers on the current tokio runtime.
    pub fn spawn(
        n: usize,
        queue: Arc<TaskQueue>,
        registry: Arc<TaskRegistry>,
        poll_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 1..=n {
            let q = Arc::clone(&queue);
            let reg = Arc::clone(&registry);
            let rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, reg, poll_interval, rx).await;
            });
            joins.push((worker_id, join));
        }

        info!(workers = n, "worker group started");
        Self {
            shutdown_tx,
            queue,
            joins,
        }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Ask workers to stop once the queue runs dry.
    /// In-flight handlers are never interrupted.
    pub fn request_shutdown(&self) {
        // ignore send error: every worker may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shut down and wait up to `join_timeout` for each worker.
    ///
    /// Sentinels queue behind the current backlog, so workers drain it before
    /// exiting. Returns how many workers were still busy when their timeout
    /// ran out; those are left detached.
    pub async fn shutdown_and_join(self, join_timeout: Duration) -> usize {
        self.request_shutdown();
        self.queue.push_shutdown(self.joins.len());

        let mut unfinished = 0;
        for (worker_id, join) in self.joins {
            match tokio::time::timeout(join_timeout, join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(worker_id, error = %e, "worker terminated abnormally"),
                Err(_) => {
                    warn!(
                        worker_id,
                        timeout_ms = join_timeout.as_millis() as u64,
                        "worker did not stop in time"
                    );
                    unfinished += 1;
                }
            }
        }
        info!(unfinished, "worker group stopped");
        unfinished
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<TaskQueue>,
    registry: Arc<TaskRegistry>,
    poll_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        match queue.pop(poll_interval).await {
            // Idle: the only moment the keep-running flag is consulted.
            None => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            Some(QueueItem::Shutdown) => break,
            Some(QueueItem::Task(id)) => run_task(worker_id, &registry, id).await,
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Execute one dequeued task and record its outcome.
///
/// Nothing in here propagates: every failure is logged and the worker moves
/// on to the next item.
async fn run_task(worker_id: usize, registry: &TaskRegistry, id: TaskId) {
    let ticket = match registry.begin_run(id) {
        Ok(Some(ticket)) => ticket,
        Ok(None) => {
            debug!(worker_id, task_id = %id, "skipping cancelled task");
            return;
        }
        Err(e) => {
            error!(worker_id, task_id = %id, error = %e, "cannot start task");
            return;
        }
    };

    info!(worker_id, task_id = %id, name = %ticket.name, "task started");
    let started = Instant::now();

    // Own tokio task so a panicking handler cannot take the worker down.
    let handler = ticket.handler;
    let args = ticket.args;
    let outcome = tokio::spawn(async move { handler.call(&args).await }).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let recorded = match outcome {
        Ok(Ok(value)) => {
            info!(worker_id, task_id = %id, name = %ticket.name, elapsed_ms, "task completed");
            registry.complete(id, value)
        }
        Ok(Err(err)) => {
            error!(worker_id, task_id = %id, name = %ticket.name, elapsed_ms, error = %err, "task failed");
            registry.fail(id, err.message())
        }
        Err(join_err) => {
            let message = join_error_message(join_err);
            error!(worker_id, task_id = %id, name = %ticket.name, elapsed_ms, error = %message, "task failed");
            registry.fail(id, message)
        }
    };

    if let Err(e) = recorded {
        error!(worker_id, task_id = %id, error = %e, "failed to record task outcome");
    }
}
