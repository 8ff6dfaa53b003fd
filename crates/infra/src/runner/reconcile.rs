//! Status reconciliation: the only path into `SUCCEEDED`/`FAILED`.

use chrono::Utc;
use tracing::{debug, info, instrument};

use applyflow_batches::{Batch, BatchStatus, BatchStatusUpdate, TaskStatus, DEFAULT_BATCH_FAILURE};
use applyflow_core::{BatchId, UserId};

use super::{BatchRunner, Reconciled, RunnerError, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::{BatchStore, TaskOrder, TaskQuery, UpdateOutcome};

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Derive the batch status from its task counts and write it back.
    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn reconcile(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<Reconciled> {
        let batch = self
            .store
            .find_batch(user_id, batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))?;
        self.reconcile_batch(&batch).await
    }

    /// Reconcile a batch the caller has already loaded.
    ///
    /// `batch` may be stale; the write is guarded on the stored status still
    /// being active, so a concurrent cancel always wins.
    pub(crate) async fn reconcile_batch(&self, batch: &Batch) -> RunnerResult<Reconciled> {
        let progress = self.store.task_progress(batch.id).await?;

        if batch.status.is_terminal() {
            return Ok(Reconciled {
                batch_status: batch.status,
                progress,
            });
        }
        let Some(derived) = progress.derive_status() else {
            return Ok(Reconciled {
                batch_status: batch.status,
                progress,
            });
        };

        let error = match derived {
            BatchStatus::Failed => Some(self.latest_failure(batch.id).await?),
            _ => None,
        };
        let update = BatchStatusUpdate {
            status: derived,
            error,
            at: Utc::now(),
        };

        match self
            .store
            .update_batch_status(batch.user_id, batch.id, &update)
            .await?
        {
            UpdateOutcome::Applied => {
                if derived.is_terminal() {
                    info!(
                        batch_id = %batch.id,
                        status = %derived,
                        succeeded = progress.succeeded,
                        failed = progress.failed,
                        skipped = progress.skipped,
                        "batch finished"
                    );
                }
                Ok(Reconciled {
                    batch_status: derived,
                    progress,
                })
            }
            UpdateOutcome::Conflict => {
                // Someone else made the batch terminal first.
                let current = self
                    .store
                    .find_batch(batch.user_id, batch.id)
                    .await?
                    .map_or(batch.status, |b| b.status);
                debug!(batch_id = %batch.id, status = %current, "reconcile lost to a concurrent write");
                Ok(Reconciled {
                    batch_status: current,
                    progress,
                })
            }
        }
    }

    /// Error of the most recently updated failed task, or the generic message.
    async fn latest_failure(&self, batch_id: BatchId) -> RunnerResult<String> {
        let latest = self
            .store
            .list_tasks(
                batch_id,
                TaskQuery::with_status(TaskStatus::Failed)
                    .order(TaskOrder::UpdatedDesc)
                    .limit(1),
            )
            .await?;

        Ok(latest
            .into_iter()
            .next()
            .and_then(|task| task.error)
            .filter(|error| !error.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BATCH_FAILURE.to_string()))
    }
}
