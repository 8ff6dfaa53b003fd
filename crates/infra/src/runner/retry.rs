use chrono::Utc;
use tracing::{info, instrument};

use applyflow_batches::{clamp_limit, validate_limit, NewBatch, TaskStatus, MAX_BATCH_SIZE};
use applyflow_core::{BatchId, JobId, UserId};

use super::{BatchRunner, InvalidState, RetryOutcome, RunnerError, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::{BatchStore, TaskOrder, TaskQuery};

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Create a new batch from the failed tasks of `source_batch_id`.
    ///
    /// Failed tasks are taken most recently updated first and deduplicated by
    /// job; at most `limit` (default `retry_task_limit`) jobs are carried
    /// over. An explicit `limit` outside `1..=200` is rejected.
    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %source_batch_id), err)]
    pub async fn retry_failed(
        &self,
        user_id: UserId,
        source_batch_id: BatchId,
        limit: Option<u32>,
    ) -> RunnerResult<RetryOutcome> {
        validate_limit(limit)?;
        let limit = clamp_limit(limit, self.config.retry_task_limit, MAX_BATCH_SIZE) as usize;

        let source = self
            .store
            .find_batch(user_id, source_batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))?;

        if let Some(active) = self.store.find_active_batch(user_id).await? {
            return Err(InvalidState::ActiveBatchExists {
                batch_id: active.id,
                status: active.status,
            }
            .into());
        }

        let failed = self
            .store
            .list_tasks(
                source.id,
                TaskQuery::with_status(TaskStatus::Failed).order(TaskOrder::UpdatedDesc),
            )
            .await?;

        let mut job_ids: Vec<JobId> = Vec::with_capacity(limit.min(failed.len()));
        for task in failed {
            if job_ids.len() == limit {
                break;
            }
            if !job_ids.contains(&task.job_id) {
                job_ids.push(task.job_id);
            }
        }
        if job_ids.is_empty() {
            return Err(InvalidState::NoFailedTasks.into());
        }

        let batch = self
            .store
            .create_batch(NewBatch::new(user_id, source.scope, job_ids), Utc::now())
            .await?;

        info!(
            batch_id = %batch.id,
            source_batch_id = %source.id,
            total = batch.total_count,
            "retry batch created"
        );
        Ok(RetryOutcome {
            batch,
            source_batch_id: source.id,
        })
    }
}
