use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use applyflow_core::{BatchId, JobId, TaskId, UserId};

use crate::status::{CompletionStatus, TaskStatus};

/// Error stored on a failed task when the caller did not supply one.
pub const DEFAULT_TASK_FAILURE: &str = "TASK_FAILED";

/// Failure messages are capped at this many characters.
pub const MAX_TASK_ERROR_CHARS: usize = 500;

/// One unit of work within a batch, targeting exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub batch_id: BatchId,
    pub user_id: UserId,
    pub job_id: JobId,
    pub status: TaskStatus,
    /// How many times the task has been claimed.
    pub attempt: u32,
    pub error: Option<String>,
    /// Store-assigned creation order; claims go lowest first.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn pending(
        batch_id: BatchId,
        user_id: UserId,
        job_id: JobId,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            batch_id,
            user_id,
            job_id,
            status: TaskStatus::Pending,
            attempt: 0,
            error: None,
            sequence,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Claim: `PENDING -> RUNNING`, clearing any stale error.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Running;
        self.attempt += 1;
        self.error = None;
        self.started_at = Some(now);
        self.completed_at = None;
        self.updated_at = now;
        true
    }

    /// Complete: `RUNNING -> terminal`. `error` should already be normalized.
    pub fn mark_completed(
        &mut self,
        status: CompletionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.status = status.into();
        self.error = error;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Cancel sweep: `PENDING -> SKIPPED`.
    pub fn mark_swept(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Skipped;
        self.error = Some(reason.to_string());
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Stale-claim recovery: `RUNNING -> PENDING`.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = now;
        true
    }
}

/// The error to persist for a completion.
///
/// Only failures carry an error: trimmed, capped at
/// [`MAX_TASK_ERROR_CHARS`], and defaulted to [`DEFAULT_TASK_FAILURE`].
pub fn normalize_task_error(status: CompletionStatus, raw: Option<&str>) -> Option<String> {
    if status != CompletionStatus::Failed {
        return None;
    }
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Some(DEFAULT_TASK_FAILURE.to_string());
    }
    Some(trimmed.chars().take(MAX_TASK_ERROR_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_task() -> Task {
        Task::pending(BatchId::new(), UserId::new(), JobId::new(), 1, Utc::now())
    }

    #[test]
    fn claim_is_only_possible_once() {
        let mut task = pending_task();
        task.error = Some("left over".into());
        assert!(task.mark_running(Utc::now()));
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempt, 1);
        assert_eq!(task.error, None);
        assert!(!task.mark_running(Utc::now()));
        assert_eq!(task.attempt, 1);
    }

    #[test]
    fn completion_requires_running() {
        let mut task = pending_task();
        assert!(!task.mark_completed(CompletionStatus::Succeeded, None, Utc::now()));
        assert_eq!(task.status, TaskStatus::Pending);

        task.mark_running(Utc::now());
        assert!(task.mark_completed(CompletionStatus::Failed, Some("x".into()), Utc::now()));
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.completed_at.is_some());
        assert!(!task.mark_completed(CompletionStatus::Failed, None, Utc::now()));
    }

    #[test]
    fn sweep_leaves_running_tasks_alone() {
        let mut running = pending_task();
        running.mark_running(Utc::now());
        assert!(!running.mark_swept("Cancelled by user", Utc::now()));
        assert_eq!(running.status, TaskStatus::Running);

        let mut pending = pending_task();
        assert!(pending.mark_swept("Cancelled by user", Utc::now()));
        assert_eq!(pending.status, TaskStatus::Skipped);
        assert_eq!(pending.error.as_deref(), Some("Cancelled by user"));
    }

    #[test]
    fn requeue_resets_claim_stamps() {
        let mut task = pending_task();
        task.mark_running(Utc::now());
        assert!(task.requeue(Utc::now()));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.started_at, None);
        assert!(task.mark_running(Utc::now()));
        assert_eq!(task.attempt, 2);
    }

    #[test]
    fn failure_errors_are_trimmed_defaulted_and_capped() {
        assert_eq!(
            normalize_task_error(CompletionStatus::Failed, Some("  boom  ")).as_deref(),
            Some("boom")
        );
        assert_eq!(
            normalize_task_error(CompletionStatus::Failed, Some("   ")).as_deref(),
            Some(DEFAULT_TASK_FAILURE)
        );
        assert_eq!(
            normalize_task_error(CompletionStatus::Failed, None).as_deref(),
            Some(DEFAULT_TASK_FAILURE)
        );
        let long = "é".repeat(MAX_TASK_ERROR_CHARS + 20);
        let capped = normalize_task_error(CompletionStatus::Failed, Some(&long)).unwrap();
        assert_eq!(capped.chars().count(), MAX_TASK_ERROR_CHARS);
    }

    #[test]
    fn non_failures_carry_no_error() {
        assert_eq!(normalize_task_error(CompletionStatus::Succeeded, Some("noise")), None);
        assert_eq!(normalize_task_error(CompletionStatus::Skipped, None), None);
    }
}
