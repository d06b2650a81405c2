//! Run/resume state: run records, the task state machine and the stores
//! that persist them.

pub mod file_store;
pub mod snapshot;
pub mod store;
pub mod transitions;
pub mod types;

pub use file_store::FileRunStore;
pub use snapshot::RunSnapshot;
pub use store::{retention_from_hours, InMemoryRunStore, RunStore, RunStoreHandle};
pub use transitions::{TaskTransition, TransitionError};
pub use types::{
    AttemptOutcome, BackendUsed, ExecutionAttempt, RunRecord, RunStatus, RunSummary, TaskRecord,
    TaskStatus, TaskUpdate,
};
