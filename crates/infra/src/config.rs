//! Runner configuration.

use std::time::Duration;

use applyflow_batches::{DEFAULT_LIST_LIMIT, MAX_BATCH_SIZE};

/// Tunables for [`BatchRunner`](crate::runner::BatchRunner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Select-then-claim rounds before a claim gives up under contention.
    pub max_claim_attempts: u32,
    /// Default number of failed tasks copied into a retry batch.
    pub retry_task_limit: u32,
    /// Default number of eligible jobs seeded into a new batch.
    pub create_batch_limit: u32,
    /// Re-queue `RUNNING` tasks claimed at least this long ago. Off when `None`.
    pub stale_claim_after: Option<Duration>,
    /// Upper bound on one [`TaskWorker`](crate::runner::TaskWorker) call.
    pub worker_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_claim_attempts: 5,
            retry_task_limit: DEFAULT_LIST_LIMIT,
            create_batch_limit: DEFAULT_LIST_LIMIT,
            stale_claim_after: None,
            worker_timeout: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_max_claim_attempts(mut self, attempts: u32) -> Self {
        self.max_claim_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_task_limit(mut self, limit: u32) -> Self {
        self.retry_task_limit = limit.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_create_batch_limit(mut self, limit: u32) -> Self {
        self.create_batch_limit = limit.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_stale_claim_after(mut self, after: Option<Duration>) -> Self {
        self.stale_claim_after = after;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.worker_timeout = timeout;
        self
    }
}
