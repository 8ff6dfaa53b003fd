use chrono::Utc;
use tracing::{info, instrument};

use applyflow_batches::{clamp_limit, Batch, CreateBatchRequest, NewBatch, MAX_BATCH_SIZE};
use applyflow_core::UserId;

use super::{BatchRunner, InvalidState, RunnerError, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::BatchStore;

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Seed a new batch from the user's eligible `NEW` jobs.
    ///
    /// Nothing is written when the user already has an active batch or no
    /// job is eligible.
    #[instrument(skip(self, request), fields(user_id = %user_id), err)]
    pub async fn create_batch(
        &self,
        user_id: UserId,
        request: CreateBatchRequest,
    ) -> RunnerResult<Batch> {
        request.validate()?;

        if let Some(active) = self.store.find_active_batch(user_id).await? {
            return Err(InvalidState::ActiveBatchExists {
                batch_id: active.id,
                status: active.status,
            }
            .into());
        }

        let limit = clamp_limit(request.limit, self.config.create_batch_limit, MAX_BATCH_SIZE);
        let job_ids = self
            .catalog
            .eligible_jobs(user_id, request.selected_job_ids.as_deref(), limit)
            .await?;
        if job_ids.is_empty() {
            return Err(RunnerError::NoEligibleJobs);
        }

        let batch = self
            .store
            .create_batch(NewBatch::new(user_id, request.scope, job_ids), Utc::now())
            .await?;

        info!(batch_id = %batch.id, total = batch.total_count, "batch created");
        Ok(batch)
    }
}
