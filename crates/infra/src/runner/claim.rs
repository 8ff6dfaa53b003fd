//! Task claiming: the concurrency-critical path.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};

use applyflow_batches::{Batch, BatchStatus, JobDisplay, Task};
use applyflow_core::{BatchId, UserId};

use super::{BatchRunner, ClaimOutcome, ClaimedTask, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::{BatchStore, UpdateOutcome};

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Claim the oldest pending task of a batch.
    ///
    /// Two concurrent claimers never receive the same task: the loser of a
    /// `PENDING -> RUNNING` race re-selects, up to `max_claim_attempts` times,
    /// after which the call degrades to `Done` with a non-terminal status.
    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn claim(&self, user_id: UserId, batch_id: BatchId) -> RunnerResult<ClaimOutcome> {
        let Some(batch) = self.store.find_batch(user_id, batch_id).await? else {
            return Ok(ClaimOutcome::NotFound);
        };
        if batch.status.is_terminal() {
            return Ok(ClaimOutcome::Terminal {
                batch_status: batch.status,
            });
        }

        let now = Utc::now();
        if batch.status == BatchStatus::Queued {
            match self.store.mark_batch_started(user_id, batch_id, now).await? {
                UpdateOutcome::Applied => info!(batch_id = %batch_id, "batch started"),
                UpdateOutcome::Conflict => debug!(batch_id = %batch_id, "batch already started"),
            }
        }

        if let Some(after) = self.config.stale_claim_after {
            self.requeue_stale(&batch, after, now).await?;
        }

        for attempt in 1..=self.config.max_claim_attempts {
            let Some(task) = self.store.oldest_pending_task(batch_id).await? else {
                let reconciled = self.reconcile_batch(&batch).await?;
                return Ok(ClaimOutcome::Done {
                    batch_status: reconciled.batch_status,
                    progress: reconciled.progress,
                });
            };

            let claimed_at = Utc::now();
            match self.store.claim_task(task.id, claimed_at).await? {
                UpdateOutcome::Applied => {
                    return Ok(ClaimOutcome::Claimed {
                        task: self.claimed(task, claimed_at).await,
                    });
                }
                UpdateOutcome::Conflict => {
                    debug!(attempt, task_id = %task.id, "lost claim race; re-selecting");
                }
            }
        }

        warn!(
            batch_id = %batch_id,
            attempts = self.config.max_claim_attempts,
            "claim contention exhausted"
        );
        let reconciled = self.reconcile_batch(&batch).await?;
        Ok(ClaimOutcome::Done {
            batch_status: reconciled.batch_status,
            progress: reconciled.progress,
        })
    }

    /// Build the claim result. The task is already `RUNNING`, so a catalog
    /// failure degrades to placeholder display fields instead of failing.
    async fn claimed(&self, mut task: Task, claimed_at: DateTime<Utc>) -> ClaimedTask {
        task.mark_running(claimed_at);
        let job = match self.catalog.job_display(task.user_id, task.job_id).await {
            Ok(Some(display)) => display,
            Ok(None) => JobDisplay::unknown(),
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "job lookup failed for claimed task");
                JobDisplay::unknown()
            }
        };
        ClaimedTask {
            task_id: task.id,
            batch_id: task.batch_id,
            job_id: task.job_id,
            attempt: task.attempt,
            job,
        }
    }

    async fn requeue_stale(
        &self,
        batch: &Batch,
        after: std::time::Duration,
        now: DateTime<Utc>,
    ) -> RunnerResult<()> {
        let Ok(after) = TimeDelta::from_std(after) else {
            return Ok(());
        };
        let Some(cutoff) = now.checked_sub_signed(after) else {
            return Ok(());
        };
        let requeued = self.store.requeue_stale_tasks(batch.id, cutoff, now).await?;
        if requeued > 0 {
            warn!(batch_id = %batch.id, requeued, "re-queued stale running tasks");
        }
        Ok(())
    }
}
