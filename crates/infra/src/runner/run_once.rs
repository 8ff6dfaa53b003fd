//! One agent-facing step: report finished work, then pick up more.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use applyflow_batches::{Batch, BatchProgress, CompletionStatus, MAX_RUN_ONCE_STEPS};
use applyflow_core::{BatchId, TaskId, UserId};

use super::{BatchRunner, ClaimOutcome, ClaimedTask, RunnerError, RunnerResult};
use crate::catalog::JobCatalog;
use crate::store::BatchStore;

/// A completion reported alongside a run-once step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub task_id: TaskId,
    pub status: CompletionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceRequest {
    /// Claims to attempt, `1..=20`. Defaults to 1.
    #[serde(default)]
    pub max_steps: Option<u32>,
    #[serde(default)]
    pub completed_tasks: Vec<TaskCompletion>,
}

impl RunOnceRequest {
    pub fn validate(&self) -> RunnerResult<u32> {
        let max_steps = self.max_steps.unwrap_or(1);
        if max_steps == 0 || max_steps > MAX_RUN_ONCE_STEPS {
            return Err(RunnerError::Validation(format!(
                "maxSteps must be between 1 and {MAX_RUN_ONCE_STEPS}"
            )));
        }
        if self.completed_tasks.len() > MAX_RUN_ONCE_STEPS as usize {
            return Err(RunnerError::Validation(format!(
                "at most {MAX_RUN_ONCE_STEPS} completedTasks per step"
            )));
        }
        Ok(max_steps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub task_id: TaskId,
    pub status: CompletionStatus,
    pub accepted: bool,
    /// Error code when the completion was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    LimitReached,
    BatchComplete,
    BatchTerminal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceReport {
    pub batch: Batch,
    pub progress: BatchProgress,
    pub tasks: Vec<ClaimedTask>,
    pub requested_max_steps: u32,
    pub completed_count: usize,
    pub completion_results: Vec<CompletionReport>,
    pub stop_reason: StopReason,
}

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    /// Apply reported completions (first report per task wins), then claim
    /// up to `max_steps` tasks.
    ///
    /// Rejected completions (`NOT_FOUND`, `INVALID_STATE`) are reported, not
    /// raised.
    #[instrument(skip(self, request), fields(user_id = %user_id, batch_id = %batch_id), err)]
    pub async fn run_once(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        request: RunOnceRequest,
    ) -> RunnerResult<RunOnceReport> {
        let max_steps = request.validate()?;
        if self.store.find_batch(user_id, batch_id).await?.is_none() {
            return Err(RunnerError::NotFound("batch"));
        }

        let mut completion_results: Vec<CompletionReport> = Vec::new();
        for completion in request.completed_tasks {
            if completion_results.iter().any(|r| r.task_id == completion.task_id) {
                continue;
            }
            let result = self
                .complete(
                    user_id,
                    batch_id,
                    completion.task_id,
                    completion.status,
                    completion.error.as_deref(),
                )
                .await;
            let error = match result {
                Ok(_) => None,
                Err(err) if err.is_soft() => {
                    debug!(task_id = %completion.task_id, error = %err, "completion rejected");
                    Some(err.code())
                }
                Err(err) => return Err(err),
            };
            completion_results.push(CompletionReport {
                task_id: completion.task_id,
                status: completion.status,
                accepted: error.is_none(),
                error,
            });
        }

        let mut tasks = Vec::new();
        let mut stop_reason = StopReason::LimitReached;
        for _ in 0..max_steps {
            match self.claim(user_id, batch_id).await? {
                ClaimOutcome::Claimed { task } => tasks.push(task),
                ClaimOutcome::Done { .. } => {
                    stop_reason = StopReason::BatchComplete;
                    break;
                }
                ClaimOutcome::Terminal { .. } => {
                    stop_reason = StopReason::BatchTerminal;
                    break;
                }
                ClaimOutcome::NotFound => return Err(RunnerError::NotFound("batch")),
            }
        }

        let batch = self
            .store
            .find_batch(user_id, batch_id)
            .await?
            .ok_or(RunnerError::NotFound("batch"))?;
        let progress = self.store.task_progress(batch_id).await?;

        Ok(RunOnceReport {
            batch,
            progress,
            tasks,
            requested_max_steps: max_steps,
            completed_count: completion_results.iter().filter(|r| r.accepted).count(),
            completion_results,
            stop_reason,
        })
    }
}
