//! Domain model (ids, state machine, records).

pub mod args;
pub mod ids;
pub mod record;
pub mod state;

pub use args::TaskArgs;
pub use ids::TaskId;
pub use record::{DEFAULT_PRIORITY, TaskRecord, TaskStatus};
pub use state::TaskState;
