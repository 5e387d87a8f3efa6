//! Named, prioritized handlers that can be queued or run inline.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{DEFAULT_PRIORITY, TaskArgs, TaskId};
use crate::engine::{Engine, TaskRequest};
use crate::error::{EngineError, TaskError};
use crate::handler::TaskHandler;

/// A handler bound to a display name and priority.
///
/// The host defines its report and statistics jobs once and then either
/// queues them (`submit`) or, in scripts and tests, runs them in place
/// (`run_sync`).
///
/// ```ignore
/// let stats = BackgroundTask::new("employee_statistics", blocking_fn(employee_stats))
///     .priority(1);
/// let id = stats.submit(&engine, TaskArgs::new())?;
/// ```
#[derive(Clone)]
pub struct BackgroundTask {
    name: String,
    priority: i32,
    handler: Arc<dyn TaskHandler>,
}

impl BackgroundTask {
    pub fn new(name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            handler,
        }
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request(&self, args: TaskArgs) -> TaskRequest {
        TaskRequest::new(self.name.clone(), Arc::clone(&self.handler))
            .with_args(args)
            .priority(self.priority)
    }

    /// Queue the task on `engine`.
    pub fn submit(&self, engine: &Engine, args: TaskArgs) -> Result<TaskId, EngineError> {
        engine.submit(self.request(args))
    }

    /// Run the handler in place, bypassing queue and registry.
    pub async fn run_sync(&self, args: TaskArgs) -> Result<Value, TaskError> {
        self.handler.call(&args).await
    }
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use crate::handler::handler_fn;
    use serde_json::json;

    fn cleanup() -> BackgroundTask {
        BackgroundTask::new(
            "cleanup_old_data",
            handler_fn(|args| async move {
                let days: u32 = args.keyword("days")?;
                Ok(json!({ "removed_before_days": days }))
            }),
        )
        .priority(3)
    }

    #[tokio::test]
    async fn run_sync_calls_handler_directly() {
        let out = cleanup()
            .run_sync(TaskArgs::new().with_kwarg("days", 7))
            .await
            .unwrap();
        assert_eq!(out, json!({ "removed_before_days": 7 }));
    }

    #[test]
    fn submit_uses_bound_name_and_priority() {
        let engine = Engine::with_defaults();
        let id = cleanup()
            .submit(&engine, TaskArgs::new().with_kwarg("days", 1))
            .unwrap();

        let status = engine.status(id).unwrap();
        assert_eq!(status.name, "cleanup_old_data");
        assert_eq!(status.priority, 3);
        assert_eq!(status.state, TaskState::Pending);
        assert_eq!(status.args.keyword::<u32>("days").unwrap(), 1);
    }
}
