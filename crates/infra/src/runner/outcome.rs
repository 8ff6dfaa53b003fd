use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use applyflow_batches::{
    Batch, BatchProgress, BatchStatus, JobDisplay, Task, TaskStatus, DEFAULT_TASK_FAILURE,
};
use applyflow_core::{BatchId, JobId, TaskId};

/// A task that was just claimed, with its job's display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedTask {
    pub task_id: TaskId,
    pub batch_id: BatchId,
    pub job_id: JobId,
    pub attempt: u32,
    #[serde(flatten)]
    pub job: JobDisplay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClaimOutcome {
    Claimed { task: ClaimedTask },
    /// No task could be claimed; the batch was reconciled.
    Done {
        batch_status: BatchStatus,
        progress: BatchProgress,
    },
    Terminal { batch_status: BatchStatus },
    NotFound,
}

/// Batch status and task counts after reconciliation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciled {
    pub batch_status: BatchStatus,
    pub progress: BatchProgress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub task_status: TaskStatus,
    pub batch_status: BatchStatus,
    pub progress: BatchProgress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub batch_status: BatchStatus,
    pub progress: BatchProgress,
    pub already_terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryOutcome {
    pub batch: Batch,
    pub source_batch_id: BatchId,
}

/// A task as shown in batch detail and summary listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub status: TaskStatus,
    pub attempt: u32,
    pub error: Option<String>,
    #[serde(flatten)]
    pub job: JobDisplay,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskView {
    pub(crate) fn new(task: Task, displays: &HashMap<JobId, JobDisplay>) -> Self {
        let job = displays
            .get(&task.job_id)
            .cloned()
            .unwrap_or_else(JobDisplay::unknown);
        let error = match task.status {
            TaskStatus::Failed => Some(task.error.unwrap_or_else(|| DEFAULT_TASK_FAILURE.to_string())),
            _ => task.error,
        };
        Self {
            task_id: task.id,
            job_id: task.job_id,
            status: task.status,
            attempt: task.attempt,
            error,
            job,
            updated_at: task.updated_at,
            completed_at: task.completed_at.or(task.status.is_terminal().then_some(task.updated_at)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDetail {
    pub batch: Batch,
    pub progress: BatchProgress,
    /// The task the next claim would pick.
    pub next_task: Option<TaskView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch: Batch,
    pub progress: BatchProgress,
    pub remaining_count: u64,
    /// Most recently updated first.
    pub failed: Vec<TaskView>,
    /// Most recently completed first.
    pub succeeded: Vec<TaskView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use applyflow_core::UserId;
    use serde_json::json;

    #[test]
    fn claim_outcomes_are_tagged_by_kind() {
        let done = ClaimOutcome::Done {
            batch_status: BatchStatus::Failed,
            progress: BatchProgress::new(0, 0, 2, 1, 0),
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({
                "kind": "done",
                "batchStatus": "FAILED",
                "progress": { "pending": 0, "running": 0, "succeeded": 2, "failed": 1, "skipped": 0 }
            })
        );
        assert_eq!(
            serde_json::to_value(ClaimOutcome::NotFound).unwrap(),
            json!({ "kind": "not_found" })
        );
    }

    #[test]
    fn claimed_task_flattens_job_fields() {
        let task = ClaimedTask {
            task_id: TaskId::new(),
            batch_id: BatchId::new(),
            job_id: JobId::new(),
            attempt: 1,
            job: JobDisplay::unknown(),
        };
        let value = serde_json::to_value(ClaimOutcome::Claimed { task }).unwrap();
        assert_eq!(value["kind"], "claimed");
        assert_eq!(value["task"]["title"], "Unknown job");
        assert_eq!(value["task"]["jobUrl"], "");
        assert!(value["task"]["company"].is_null());
    }

    #[test]
    fn failed_task_view_defaults_error() {
        let mut task = Task::pending(BatchId::new(), UserId::new(), JobId::new(), 1, Utc::now());
        task.status = TaskStatus::Failed;
        let view = TaskView::new(task, &HashMap::new());
        assert_eq!(view.error.as_deref(), Some(DEFAULT_TASK_FAILURE));
        assert_eq!(view.job, JobDisplay::unknown());
        assert!(view.completed_at.is_some());
    }
}
