//! Application batch domain module.
//!
//! Batches, tasks and the rules that tie their statuses together, implemented
//! as deterministic domain logic (no IO, no HTTP, no storage). Stores apply
//! the transitions defined here; the runner decides when to apply them.

pub mod batch;
pub mod job;
pub mod progress;
pub mod request;
pub mod status;
pub mod task;

pub use batch::{Batch, BatchStatusUpdate, NewBatch, CANCELLED_BY_USER};
pub use job::{JobDisplay, JobRecord, JobStatus};
pub use progress::{BatchProgress, DEFAULT_BATCH_FAILURE};
pub use request::{
    clamp_limit, validate_limit, CreateBatchRequest, DEFAULT_LIST_LIMIT, MAX_BATCH_SIZE,
    MAX_RUN_ONCE_STEPS,
};
pub use status::{BatchScope, BatchStatus, CompletionStatus, ParseStatusError, TaskStatus};
pub use task::{normalize_task_error, Task, DEFAULT_TASK_FAILURE, MAX_TASK_ERROR_CHARS};
