use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinError;

use crate::domain::TaskArgs;
use crate::error::TaskError;

/// The callable behind a task.
///
/// The engine treats handlers as opaque: it hands them the task's arguments
/// and records whatever they return. Returning `Err` marks the task FAILED.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        (self.f)(args.clone()).await
    }
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// let h = handler_fn(|args| async move {
///     let a: i64 = args.positional(0)?;
///     Ok(serde_json::json!(a * 2))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Handler backed by a synchronous closure, run on tokio's blocking pool.
///
/// Report and statistics computations do blocking I/O; running them inline
/// would stall the worker's runtime thread.
pub struct BlockingHandler<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> TaskHandler for BlockingHandler<F>
where
    F: Fn(&TaskArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    async fn call(&self, args: &TaskArgs) -> Result<Value, TaskError> {
        let f = Arc::clone(&self.f);
        let args = args.clone();
        tokio::task::spawn_blocking(move || f(&args))
            .await
            .map_err(|e| TaskError::new(join_error_message(e)))?
    }
}

/// Wrap a synchronous closure as a handler.
pub fn blocking_fn<F>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(&TaskArgs) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    Arc::new(BlockingHandler { f: Arc::new(f) })
}

/// Describe why a spawned handler did not return normally.
pub(crate) fn join_error_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was aborted".to_string();
    }
    let payload = err.into_panic();
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    format!("task panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_handler_receives_arguments() {
        let h = handler_fn(|args| async move {
            let a: i64 = args.positional(0)?;
            let b: i64 = args.keyword("b")?;
            Ok(json!(a + b))
        });

        let args = TaskArgs::new().with_arg(2).with_kwarg("b", 3);
        assert_eq!(h.call(&args).await.unwrap(), json!(5));
    }

    #[tokio::test]
    async fn fn_handler_errors_pass_through() {
        let h = handler_fn(|_args| async { Err(TaskError::new("boom")) });
        let err = h.call(&TaskArgs::new()).await.unwrap_err();
        assert_eq!(err.message(), "boom");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_handler_runs_off_the_runtime() {
        let h = blocking_fn(|args| {
            std::thread::sleep(std::time::Duration::from_millis(10));
            let n: u64 = args.positional(0)?;
            Ok(json!(n * n))
        });
        assert_eq!(h.call(&TaskArgs::new().with_arg(7)).await.unwrap(), json!(49));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_handler_panic_becomes_task_error() {
        let h = blocking_fn(|_args| panic!("ledger corrupted"));
        let err = h.call(&TaskArgs::new()).await.unwrap_err();
        assert!(err.message().contains("ledger corrupted"));
    }
}
