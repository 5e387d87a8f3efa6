//! offload-core
//!
//! In-process background jobs and an expiring cache, used to move expensive
//! report/statistics computation off the request path and to memoize hot
//! read queries.
//!
//! # Modules
//! - **domain**: ids, task state machine, task records and arguments
//! - **handler**: the `TaskHandler` trait and closure adapters
//! - **queue**: priority/FIFO in-memory queue with shutdown sentinels
//! - **registry**: id -> record / result maps polled by submitters
//! - **worker**: worker group executing queued tasks
//! - **engine**: the object the host owns (`new` / `start` / `submit` / `shutdown`)
//! - **background**: named, prioritized tasks that can be queued or run inline
//! - **cache**: expiring cache, memoization, cached queries
//! - **instrument**: execution-time logging
//! - **config**: settings with TOML overrides
//! - **observability**: task counts

pub mod background;
pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod handler;
pub mod instrument;
pub mod observability;
pub mod queue;
pub mod registry;
pub mod worker;

pub use background::BackgroundTask;
pub use cache::{AppCache, ExpiringCache, Memoized, cached_query, memoize, memoize_with_key};
pub use config::{CacheSettings, EngineSettings, InstrumentSettings, Settings};
pub use domain::{TaskArgs, TaskId, TaskState, TaskStatus};
pub use engine::{Engine, ShutdownReport, TaskRequest};
pub use error::{EngineError, TaskError};
pub use handler::{TaskHandler, blocking_fn, handler_fn};
pub use instrument::{Instrument, instrument};
pub use observability::TaskCounts;
