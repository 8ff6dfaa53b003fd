//! In-memory batch store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use applyflow_batches::{
    Batch, BatchProgress, BatchStatus, BatchStatusUpdate, CompletionStatus, NewBatch, Task,
    TaskStatus,
};
use applyflow_core::{BatchId, TaskId, UserId};

use super::{BatchStore, StoreError, StoreResult, TaskOrder, TaskQuery, UpdateOutcome};

#[derive(Debug, Default)]
struct State {
    batches: HashMap<BatchId, Batch>,
    tasks: HashMap<TaskId, Task>,
    next_sequence: u64,
}

impl State {
    fn owned_batch_mut(&mut self, user_id: UserId, batch_id: BatchId) -> Option<&mut Batch> {
        self.batches
            .get_mut(&batch_id)
            .filter(|batch| batch.user_id == user_id)
    }

    fn tasks_of(&self, batch_id: BatchId) -> impl Iterator<Item = &Task> {
        self.tasks.values().filter(move |t| t.batch_id == batch_id)
    }
}

/// In-memory batch store.
///
/// All state sits behind one lock, so every guarded write (and the
/// check-and-insert in `create_batch`) is atomic.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    state: RwLock<State>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Storage("batch store lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Storage("batch store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn find_batch(&self, user_id: UserId, batch_id: BatchId) -> StoreResult<Option<Batch>> {
        let state = self.read()?;
        Ok(state
            .batches
            .get(&batch_id)
            .filter(|batch| batch.user_id == user_id)
            .cloned())
    }

    async fn find_active_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>> {
        let state = self.read()?;
        Ok(state
            .batches
            .values()
            .filter(|b| b.user_id == user_id && b.status.is_active())
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn latest_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>> {
        let state = self.read()?;
        Ok(state
            .batches
            .values()
            .filter(|b| b.user_id == user_id)
            .max_by_key(|b| (b.updated_at, b.created_at))
            .cloned())
    }

    async fn create_batch(&self, new: NewBatch, now: DateTime<Utc>) -> StoreResult<Batch> {
        let mut state = self.write()?;

        if let Some(active) = state
            .batches
            .values()
            .find(|b| b.user_id == new.user_id && b.status.is_active())
        {
            return Err(StoreError::ActiveBatchExists {
                batch_id: active.id,
                status: active.status,
            });
        }

        let batch = Batch::queued(BatchId::new(), &new, now);
        for job_id in new.job_ids() {
            state.next_sequence += 1;
            let task = Task::pending(batch.id, new.user_id, *job_id, state.next_sequence, now);
            state.tasks.insert(task.id, task);
        }
        state.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn mark_batch_started(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let mut state = self.write()?;
        Ok(state
            .owned_batch_mut(user_id, batch_id)
            .is_some_and(|batch| batch.mark_started(now))
            .into())
    }

    async fn update_batch_status(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        update: &BatchStatusUpdate,
    ) -> StoreResult<UpdateOutcome> {
        let mut state = self.write()?;
        Ok(state
            .owned_batch_mut(user_id, batch_id)
            .is_some_and(|batch| batch.apply_status(update))
            .into())
    }

    async fn cancel_batch(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let mut state = self.write()?;
        let cancelled = state
            .owned_batch_mut(user_id, batch_id)
            .is_some_and(|batch| batch.mark_cancelled(now));
        if !cancelled {
            return Ok(UpdateOutcome::Conflict);
        }
        if let Some(batch) = state.batches.get_mut(&batch_id) {
            batch.error = Some(reason.to_string());
        }
        for task in state.tasks.values_mut().filter(|t| t.batch_id == batch_id) {
            task.mark_swept(reason, now);
        }
        Ok(UpdateOutcome::Applied)
    }

    async fn task_progress(&self, batch_id: BatchId) -> StoreResult<BatchProgress> {
        let state = self.read()?;
        Ok(BatchProgress::tally(state.tasks_of(batch_id).map(|t| t.status)))
    }

    async fn oldest_pending_task(&self, batch_id: BatchId) -> StoreResult<Option<Task>> {
        let state = self.read()?;
        Ok(state
            .tasks_of(batch_id)
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| t.sequence)
            .cloned())
    }

    async fn claim_task(&self, task_id: TaskId, now: DateTime<Utc>) -> StoreResult<UpdateOutcome> {
        let mut state = self.write()?;
        Ok(state
            .tasks
            .get_mut(&task_id)
            .is_some_and(|task| task.mark_running(now))
            .into())
    }

    async fn find_task(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        task_id: TaskId,
    ) -> StoreResult<Option<Task>> {
        let state = self.read()?;
        Ok(state
            .tasks
            .get(&task_id)
            .filter(|t| t.user_id == user_id && t.batch_id == batch_id)
            .cloned())
    }

    async fn complete_task(
        &self,
        task_id: TaskId,
        status: CompletionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let mut state = self.write()?;
        Ok(state
            .tasks
            .get_mut(&task_id)
            .is_some_and(|task| task.mark_completed(status, error, now))
            .into())
    }

    async fn list_tasks(&self, batch_id: BatchId, query: TaskQuery) -> StoreResult<Vec<Task>> {
        let state = self.read()?;
        let mut tasks: Vec<Task> = state
            .tasks_of(batch_id)
            .filter(|t| query.matches(t))
            .cloned()
            .collect();

        match query.order {
            TaskOrder::Sequence => tasks.sort_by_key(|t| t.sequence),
            TaskOrder::UpdatedDesc => {
                tasks.sort_by(|a, b| (b.updated_at, b.sequence).cmp(&(a.updated_at, a.sequence)))
            }
            TaskOrder::CompletedDesc => tasks.sort_by(|a, b| {
                let a_key = (a.completed_at.unwrap_or(a.updated_at), a.updated_at, a.sequence);
                let b_key = (b.completed_at.unwrap_or(b.updated_at), b.updated_at, b.sequence);
                b_key.cmp(&a_key)
            }),
        }
        if let Some(limit) = query.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn requeue_stale_tasks(
        &self,
        batch_id: BatchId,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.write()?;
        let active = state
            .batches
            .get(&batch_id)
            .is_some_and(|batch| batch.status.is_active());
        if !active {
            return Ok(0);
        }
        let mut requeued = 0;
        for task in state.tasks.values_mut().filter(|t| {
            t.batch_id == batch_id
                && t.status == TaskStatus::Running
                && t.started_at.is_some_and(|started| started <= started_before)
        }) {
            if task.requeue(now) {
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use applyflow_batches::{BatchScope, CANCELLED_BY_USER};
    use applyflow_core::JobId;

    fn new_batch(user_id: UserId, jobs: usize) -> NewBatch {
        NewBatch::new(user_id, BatchScope::New, (0..jobs).map(|_| JobId::new()))
    }

    #[tokio::test]
    async fn create_rejects_second_active_batch() {
        let store = InMemoryBatchStore::new();
        let user = UserId::new();
        let first = store.create_batch(new_batch(user, 2), Utc::now()).await.unwrap();

        let err = store
            .create_batch(new_batch(user, 1), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::ActiveBatchExists {
                batch_id: first.id,
                status: BatchStatus::Queued,
            }
        );

        // Another user is unaffected.
        assert!(store.create_batch(new_batch(UserId::new(), 1), Utc::now()).await.is_ok());
    }

    #[tokio::test]
    async fn batches_are_scoped_to_their_owner() {
        let store = InMemoryBatchStore::new();
        let owner = UserId::new();
        let batch = store.create_batch(new_batch(owner, 1), Utc::now()).await.unwrap();

        assert!(store.find_batch(UserId::new(), batch.id).await.unwrap().is_none());
        assert_eq!(
            store.mark_batch_started(UserId::new(), batch.id, Utc::now()).await.unwrap(),
            UpdateOutcome::Conflict
        );
        assert!(store.find_batch(owner, batch.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claim_is_guarded_on_pending() {
        let store = InMemoryBatchStore::new();
        let batch = store
            .create_batch(new_batch(UserId::new(), 1), Utc::now())
            .await
            .unwrap();
        let task = store.oldest_pending_task(batch.id).await.unwrap().unwrap();

        assert_eq!(store.claim_task(task.id, Utc::now()).await.unwrap(), UpdateOutcome::Applied);
        assert_eq!(store.claim_task(task.id, Utc::now()).await.unwrap(), UpdateOutcome::Conflict);
        assert!(store.oldest_pending_task(batch.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_sweeps_pending_only() {
        let store = InMemoryBatchStore::new();
        let user = UserId::new();
        let batch = store.create_batch(new_batch(user, 3), Utc::now()).await.unwrap();
        let first = store.oldest_pending_task(batch.id).await.unwrap().unwrap();
        store.claim_task(first.id, Utc::now()).await.unwrap();

        let outcome = store
            .cancel_batch(user, batch.id, CANCELLED_BY_USER, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(
            store.task_progress(batch.id).await.unwrap(),
            BatchProgress::new(0, 1, 0, 0, 2)
        );

        let again = store
            .cancel_batch(user, batch.id, CANCELLED_BY_USER, Utc::now())
            .await
            .unwrap();
        assert_eq!(again, UpdateOutcome::Conflict);
    }

    #[tokio::test]
    async fn list_orders_by_sequence_and_limits() {
        let store = InMemoryBatchStore::new();
        let new = new_batch(UserId::new(), 4);
        let expected: Vec<JobId> = new.job_ids().to_vec();
        let batch = store.create_batch(new, Utc::now()).await.unwrap();

        let listed = store
            .list_tasks(batch.id, TaskQuery::default().limit(3))
            .await
            .unwrap();
        let jobs: Vec<JobId> = listed.iter().map(|t| t.job_id).collect();
        assert_eq!(jobs, expected[..3]);
    }

    #[tokio::test]
    async fn requeue_only_touches_old_claims() {
        let store = InMemoryBatchStore::new();
        let batch = store
            .create_batch(new_batch(UserId::new(), 2), Utc::now())
            .await
            .unwrap();
        let t0 = Utc::now();
        let old = store.oldest_pending_task(batch.id).await.unwrap().unwrap();
        store.claim_task(old.id, t0).await.unwrap();
        let fresh = store.oldest_pending_task(batch.id).await.unwrap().unwrap();
        store
            .claim_task(fresh.id, t0 + chrono::Duration::minutes(10))
            .await
            .unwrap();

        let requeued = store
            .requeue_stale_tasks(batch.id, t0 + chrono::Duration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(requeued, 1);
        let pending = store.oldest_pending_task(batch.id).await.unwrap().unwrap();
        assert_eq!(pending.id, old.id);
    }

    #[tokio::test]
    async fn requeue_leaves_cancelled_batches_alone() {
        let store = InMemoryBatchStore::new();
        let user = UserId::new();
        let batch = store.create_batch(new_batch(user, 2), Utc::now()).await.unwrap();
        let t0 = Utc::now();
        let claimed = store.oldest_pending_task(batch.id).await.unwrap().unwrap();
        store.claim_task(claimed.id, t0).await.unwrap();
        store
            .cancel_batch(user, batch.id, CANCELLED_BY_USER, t0)
            .await
            .unwrap();

        let requeued = store
            .requeue_stale_tasks(batch.id, t0 + chrono::Duration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(requeued, 0);
        let task = store.find_task(user, batch.id, claimed.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(store.oldest_pending_task(batch.id).await.unwrap().is_none());
    }
}
