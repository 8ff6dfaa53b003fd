//! Durable storage for batches and their tasks.
//!
//! Every conditional write reports an [`UpdateOutcome`] instead of failing when
//! its guard does not hold; the runner decides what a lost race means.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use applyflow_batches::{
    Batch, BatchProgress, BatchStatus, BatchStatusUpdate, CompletionStatus, NewBatch, Task,
    TaskStatus,
};
use applyflow_core::{BatchId, TaskId, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryBatchStore;
pub use postgres::PostgresBatchStore;

/// Result of a guarded (compare-and-swap) write.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The guard held and the row was written.
    Applied,
    /// The guard did not hold (or the row is gone); nothing was written.
    Conflict,
}

impl UpdateOutcome {
    pub fn from_rows_affected(rows: u64) -> Self {
        if rows > 0 {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Conflict
        }
    }
}

impl From<bool> for UpdateOutcome {
    fn from(applied: bool) -> Self {
        if applied {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::Conflict
        }
    }
}

/// Order for task listings.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum TaskOrder {
    /// Creation order, oldest first.
    #[default]
    Sequence,
    /// Most recently updated first.
    UpdatedDesc,
    /// Most recently completed first (falling back to `updated_at`).
    CompletedDesc,
}

/// Filter for [`BatchStore::list_tasks`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub order: TaskOrder,
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn order(mut self, order: TaskOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|status| task.status == status)
    }
}

/// Store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The one-active-batch-per-user constraint rejected a new batch.
    #[error("user already has an active batch {batch_id} ({status})")]
    ActiveBatchExists { batch_id: BatchId, status: BatchStatus },
    /// A uniqueness constraint other than the active-batch one was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Batch and task persistence.
///
/// Batch lookups are always scoped to the owning user; task operations take a
/// batch id the caller has already resolved for that user.
#[async_trait::async_trait]
pub trait BatchStore: Send + Sync {
    async fn find_batch(&self, user_id: UserId, batch_id: BatchId) -> StoreResult<Option<Batch>>;

    /// The user's `QUEUED` or `RUNNING` batch, if any.
    async fn find_active_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>>;

    /// The user's most recently updated batch.
    async fn latest_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>>;

    /// Atomically insert a `QUEUED` batch and one `PENDING` task per job id.
    ///
    /// Fails with [`StoreError::ActiveBatchExists`] when the user already has
    /// an active batch. Duplicate job ids within the batch are skipped.
    async fn create_batch(&self, new: NewBatch, now: DateTime<Utc>) -> StoreResult<Batch>;

    /// `QUEUED -> RUNNING`, stamping `started_at`.
    async fn mark_batch_started(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome>;

    /// Write a reconciled status, guarded on the batch still being active.
    async fn update_batch_status(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        update: &BatchStatusUpdate,
    ) -> StoreResult<UpdateOutcome>;

    /// Atomically cancel an active batch and sweep its `PENDING` tasks to
    /// `SKIPPED` with `reason`. `Conflict` when the batch is already terminal.
    async fn cancel_batch(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome>;

    async fn task_progress(&self, batch_id: BatchId) -> StoreResult<BatchProgress>;

    /// The `PENDING` task with the lowest creation sequence.
    async fn oldest_pending_task(&self, batch_id: BatchId) -> StoreResult<Option<Task>>;

    /// `PENDING -> RUNNING`, clearing the error and bumping `attempt`.
    async fn claim_task(&self, task_id: TaskId, now: DateTime<Utc>) -> StoreResult<UpdateOutcome>;

    async fn find_task(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        task_id: TaskId,
    ) -> StoreResult<Option<Task>>;

    /// `RUNNING -> status`, stamping `completed_at`.
    async fn complete_task(
        &self,
        task_id: TaskId,
        status: CompletionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome>;

    async fn list_tasks(&self, batch_id: BatchId, query: TaskQuery) -> StoreResult<Vec<Task>>;

    /// `RUNNING -> PENDING` for tasks claimed at or before `started_before`.
    /// Only applies while the batch is still active. Returns how many tasks
    /// were re-queued.
    async fn requeue_stale_tasks(
        &self,
        batch_id: BatchId,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;
}

#[async_trait::async_trait]
impl<S> BatchStore for Arc<S>
where
    S: BatchStore + ?Sized,
{
    async fn find_batch(&self, user_id: UserId, batch_id: BatchId) -> StoreResult<Option<Batch>> {
        (**self).find_batch(user_id, batch_id).await
    }

    async fn find_active_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>> {
        (**self).find_active_batch(user_id).await
    }

    async fn latest_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>> {
        (**self).latest_batch(user_id).await
    }

    async fn create_batch(&self, new: NewBatch, now: DateTime<Utc>) -> StoreResult<Batch> {
        (**self).create_batch(new, now).await
    }

    async fn mark_batch_started(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        (**self).mark_batch_started(user_id, batch_id, now).await
    }

    async fn update_batch_status(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        update: &BatchStatusUpdate,
    ) -> StoreResult<UpdateOutcome> {
        (**self).update_batch_status(user_id, batch_id, update).await
    }

    async fn cancel_batch(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        (**self).cancel_batch(user_id, batch_id, reason, now).await
    }

    async fn task_progress(&self, batch_id: BatchId) -> StoreResult<BatchProgress> {
        (**self).task_progress(batch_id).await
    }

    async fn oldest_pending_task(&self, batch_id: BatchId) -> StoreResult<Option<Task>> {
        (**self).oldest_pending_task(batch_id).await
    }

    async fn claim_task(&self, task_id: TaskId, now: DateTime<Utc>) -> StoreResult<UpdateOutcome> {
        (**self).claim_task(task_id, now).await
    }

    async fn find_task(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        task_id: TaskId,
    ) -> StoreResult<Option<Task>> {
        (**self).find_task(user_id, batch_id, task_id).await
    }

    async fn complete_task(
        &self,
        task_id: TaskId,
        status: CompletionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        (**self).complete_task(task_id, status, error, now).await
    }

    async fn list_tasks(&self, batch_id: BatchId, query: TaskQuery) -> StoreResult<Vec<Task>> {
        (**self).list_tasks(batch_id, query).await
    }

    async fn requeue_stale_tasks(
        &self,
        batch_id: BatchId,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        (**self).requeue_stale_tasks(batch_id, started_before, now).await
    }
}
