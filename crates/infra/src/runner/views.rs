//! Read-only projections over a batch: progress, detail, summary, latest.

use std::collections::HashMap;

use tracing::instrument;

use applyflow_batches::{Batch, BatchProgress, JobDisplay, Task, TaskStatus, DEFAULT_LIST_LIMIT};
use applyflow_core::{BatchId, JobId, UserId};

use super::{BatchDetail, BatchRunner, BatchSummary, RunnerError, RunnerResult, TaskView};
use crate::catalog::JobCatalog;
use crate::store::{BatchStore, TaskOrder, TaskQuery};

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Task counts for a batch. Sums to the batch's current task count.
    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn progress(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<BatchProgress> {
        let batch = self.owned_batch(user_id, batch_id).await?;
        Ok(self.store.task_progress(batch.id).await?)
    }

    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn detail(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<BatchDetail> {
        let batch = self.owned_batch(user_id, batch_id).await?;
        let progress = self.store.task_progress(batch.id).await?;
        let next = self.store.oldest_pending_task(batch.id).await?;

        let next_task = match next {
            Some(task) => {
                let displays = self.displays(user_id, &[task.job_id]).await?;
                Some(TaskView::new(task, &displays))
            }
            None => None,
        };

        Ok(BatchDetail {
            batch,
            progress,
            next_task,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn summary(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<BatchSummary> {
        let batch = self.owned_batch(user_id, batch_id).await?;
        let progress = self.store.task_progress(batch.id).await?;
        let limit = DEFAULT_LIST_LIMIT as usize;

        let failed = self
            .store
            .list_tasks(
                batch.id,
                TaskQuery::with_status(TaskStatus::Failed)
                    .order(TaskOrder::UpdatedDesc)
                    .limit(limit),
            )
            .await?;
        let succeeded = self
            .store
            .list_tasks(
                batch.id,
                TaskQuery::with_status(TaskStatus::Succeeded)
                    .order(TaskOrder::CompletedDesc)
                    .limit(limit),
            )
            .await?;

        let job_ids: Vec<JobId> = failed
            .iter()
            .chain(succeeded.iter())
            .map(|task| task.job_id)
            .collect();
        let displays = self.displays(user_id, &job_ids).await?;

        Ok(BatchSummary {
            batch,
            progress,
            remaining_count: progress.remaining(),
            failed: views(failed, &displays),
            succeeded: views(succeeded, &displays),
        })
    }

    /// The user's most recently updated batch, if any.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn latest(&self, user_id: UserId) -> RunnerResult<Option<Batch>> {
        Ok(self.store.latest_batch(user_id).await?)
    }

    async fn owned_batch(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<Batch> {
        self.store
            .find_batch(user_id, batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))
    }

    async fn displays(
        &self,
        user_id: UserId,
        job_ids: &[JobId],
    ) -> RunnerResult<HashMap<JobId, JobDisplay>> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self.catalog.job_displays(user_id, job_ids).await?)
    }
}

fn views(tasks: Vec<Task>, displays: &HashMap<JobId, JobDisplay>) -> Vec<TaskView> {
    tasks
        .into_iter()
        .map(|task| TaskView::new(task, displays))
        .collect()
}
