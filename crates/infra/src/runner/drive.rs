//! In-process driver: claim, hand to a worker, report, repeat.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

use applyflow_batches::{BatchProgress, BatchStatus, CompletionStatus};
use applyflow_core::{BatchId, JobId, TaskId, UserId};

use super::{BatchRunner, ClaimOutcome, ClaimedTask, RunnerError, RunnerResult, StopReason};
use crate::catalog::JobCatalog;
use crate::store::BatchStore;

/// What a worker made of one claimed task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    Succeeded,
    Skipped,
    Failed(String),
}

impl WorkOutcome {
    fn into_completion(self) -> (CompletionStatus, Option<String>) {
        match self {
            WorkOutcome::Succeeded => (CompletionStatus::Succeeded, None),
            WorkOutcome::Skipped => (CompletionStatus::Skipped, None),
            WorkOutcome::Failed(reason) => (CompletionStatus::Failed, Some(reason)),
        }
    }
}

/// Performs the external work for a claimed task.
#[async_trait]
pub trait TaskWorker: Send + Sync {
    async fn process(&self, task: &ClaimedTask) -> WorkOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveStep {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub status: CompletionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveReport {
    pub steps: Vec<DriveStep>,
    pub stop_reason: StopReason,
    pub batch_status: BatchStatus,
    pub progress: BatchProgress,
}

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Work a batch with `worker` for at most `max_steps` claims.
    ///
    /// A completion rejected because the batch moved on underneath (cancel,
    /// stale re-queue) is logged and the loop continues.
    #[instrument(skip(self, worker), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn drive<W>(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        max_steps: u32,
        worker: &W,
    ) -> RunnerResult<DriveReport>
    where
        W: TaskWorker + ?Sized,
    {
        let mut steps = Vec::new();

        for _ in 0..max_steps {
            let task = match self.claim(user_id, batch_id).await? {
                ClaimOutcome::Claimed { task } => task,
                ClaimOutcome::Done {
                    batch_status,
                    progress,
                } => {
                    return Ok(DriveReport {
                        steps,
                        stop_reason: StopReason::BatchComplete,
                        batch_status,
                        progress,
                    });
                }
                ClaimOutcome::Terminal { batch_status } => {
                    return Ok(DriveReport {
                        steps,
                        stop_reason: StopReason::BatchTerminal,
                        batch_status,
                        progress: self.store.task_progress(batch_id).await?,
                    });
                }
                ClaimOutcome::NotFound => return Err(RunnerError::NotFound("batch")),
            };

            let (status, error) = self.work(worker, &task).await.into_completion();
            match self
                .complete(user_id, batch_id, task.task_id, status, error.as_deref())
                .await
            {
                Ok(_) => {}
                Err(err) if err.is_soft() => {
                    warn!(task_id = %task.task_id, error = %err, "completion rejected");
                }
                Err(err) => return Err(err),
            }
            steps.push(DriveStep {
                task_id: task.task_id,
                job_id: task.job_id,
                status,
            });
        }

        let batch = self
            .store
            .find_batch(user_id, batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))?;
        let progress = self.store.task_progress(batch_id).await?;
        info!(batch_id = %batch_id, steps = steps.len(), "drive step limit reached");

        Ok(DriveReport {
            steps,
            stop_reason: StopReason::LimitReached,
            batch_status: batch.status,
            progress,
        })
    }

    async fn work<W>(&self, worker: &W, task: &ClaimedTask) -> WorkOutcome
    where
        W: TaskWorker + ?Sized,
    {
        let Some(limit) = self.config.worker_timeout else {
            return worker.process(task).await;
        };
        match tokio::time::timeout(limit, worker.process(task)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(task_id = %task.task_id, timeout_ms = limit.as_millis() as u64, "worker timed out");
                WorkOutcome::Failed(format!("worker timed out after {}ms", limit.as_millis()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_carry_their_reason() {
        assert_eq!(
            WorkOutcome::Failed("captcha".into()).into_completion(),
            (CompletionStatus::Failed, Some("captcha".to_string()))
        );
        assert_eq!(
            WorkOutcome::Skipped.into_completion(),
            (CompletionStatus::Skipped, None)
        );
    }
}
