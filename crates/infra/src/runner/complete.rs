use chrono::Utc;
use tracing::{debug, instrument};

use applyflow_batches::{CompletionStatus, TaskStatus, normalize_task_error};
use applyflow_core::{BatchId, TaskId, UserId};

use super::{BatchRunner, CompletionOutcome, InvalidState, RunnerError, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::{BatchStore, UpdateOutcome};

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Report the terminal outcome of a claimed task, then reconcile.
    ///
    /// Re-reporting the status a task already holds is an idempotent success.
    #[instrument(
        skip(self, error),
        fields(user_id = %user_id, batch_id = %batch_id, task_id = %task_id),
        err
    )]
    pub async fn complete(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        task_id: TaskId,
        status: CompletionStatus,
        error: Option<&str>,
    ) -> RunnerResult<CompletionOutcome> {
        let task = self
            .store
            .find_task(user_id, batch_id, task_id)
            .await?
            .ok_or(RunnerError::NotFound("task"))?;

        let task_status = match task.status {
            TaskStatus::Running => {
                let error = normalize_task_error(status, error);
                match self
                    .store
                    .complete_task(task.id, status, error, Utc::now())
                    .await?
                {
                    UpdateOutcome::Applied => status.into(),
                    UpdateOutcome::Conflict => {
                        let current = self
                            .store
                            .find_task(user_id, batch_id, task_id)
                            .await?
                            .ok_or(RunnerError::NotFound("task"))?
                            .status;
                        debug!(current = %current, "completion raced with another writer");
                        replay(current, status)?
                    }
                }
            }
            current => replay(current, status)?,
        };

        let batch = self
            .store
            .find_batch(user_id, batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))?;
        let reconciled = self.reconcile_batch(&batch).await?;

        Ok(CompletionOutcome {
            task_status,
            batch_status: reconciled.batch_status,
            progress: reconciled.progress,
        })
    }
}

/// A completion for a task that is no longer `RUNNING` succeeds only if it
/// repeats the status the task already holds.
fn replay(current: TaskStatus, requested: CompletionStatus) -> Result<TaskStatus, InvalidState> {
    if current == TaskStatus::from(requested) {
        Ok(current)
    } else {
        Err(InvalidState::TaskNotRunning { current })
    }
}
