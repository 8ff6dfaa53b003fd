use chrono::Utc;
use tracing::{info, instrument};

use applyflow_batches::{BatchStatus, CANCELLED_BY_USER};
use applyflow_core::{BatchId, UserId};

use super::{BatchRunner, CancelOutcome, RunnerError, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::{BatchStore, UpdateOutcome};

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Terminally cancel a batch, sweeping its pending tasks to `SKIPPED`.
    ///
    /// Running tasks are left alone; their completions still succeed but no
    /// longer move the batch.
    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn cancel(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<CancelOutcome> {
        let batch = self
            .store
            .find_batch(user_id, batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))?;

        if batch.status.is_terminal() {
            return Ok(CancelOutcome {
                batch_status: batch.status,
                progress: self.store.task_progress(batch_id).await?,
                already_terminal: true,
            });
        }

        let outcome = self
            .store
            .cancel_batch(user_id, batch_id, CANCELLED_BY_USER, Utc::now())
            .await?;
        let progress = self.store.task_progress(batch_id).await?;

        match outcome {
            UpdateOutcome::Applied => {
                info!(batch_id = %batch_id, skipped = progress.skipped, "batch cancelled");
                Ok(CancelOutcome {
                    batch_status: BatchStatus::Cancelled,
                    progress,
                    already_terminal: false,
                })
            }
            UpdateOutcome::Conflict => {
                let current = self
                    .store
                    .find_batch(user_id, batch_id)
                    .await?
                    .ok_or(RunnerError::NotFound("batch"))?;
                Ok(CancelOutcome {
                    batch_status: current.status,
                    progress,
                    already_terminal: true,
                })
            }
        }
    }
}
