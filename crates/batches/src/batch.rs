use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use applyflow_core::{BatchId, JobId, UserId};

use crate::status::{BatchScope, BatchStatus};

/// Error recorded on a batch, and on its swept tasks, when the user cancels it.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// A user-initiated unit of work containing many tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    pub user_id: UserId,
    pub scope: BatchScope,
    pub status: BatchStatus,
    /// Number of tasks created with the batch. Never re-derived.
    pub total_count: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for creating a batch together with its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBatch {
    pub user_id: UserId,
    pub scope: BatchScope,
    job_ids: Vec<JobId>,
}

impl NewBatch {
    /// Job ids are deduplicated, keeping first-seen order.
    pub fn new(user_id: UserId, scope: BatchScope, job_ids: impl IntoIterator<Item = JobId>) -> Self {
        let mut unique = Vec::new();
        for job_id in job_ids {
            if !unique.contains(&job_id) {
                unique.push(job_id);
            }
        }
        Self {
            user_id,
            scope,
            job_ids: unique,
        }
    }

    /// Job ids in the order their tasks must be created (and later claimed).
    pub fn job_ids(&self) -> &[JobId] {
        &self.job_ids
    }

    pub fn total_count(&self) -> u32 {
        self.job_ids.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.job_ids.is_empty()
    }
}

/// A reconciled status to write onto a non-terminal batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatusUpdate {
    pub status: BatchStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl Batch {
    /// A freshly created, queued batch.
    pub fn queued(id: BatchId, new: &NewBatch, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            scope: new.scope,
            status: BatchStatus::Queued,
            total_count: new.total_count(),
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// `QUEUED -> RUNNING`. Returns false when the batch was not queued.
    pub fn mark_started(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != BatchStatus::Queued {
            return false;
        }
        self.status = BatchStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Write a reconciled status. Terminal batches are left untouched.
    ///
    /// `started_at` and `completed_at` are stamped once and never overwritten;
    /// `completed_at` is cleared while the batch is still running.
    pub fn apply_status(&mut self, update: &BatchStatusUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = update.status;
        self.started_at = self.started_at.or(Some(update.at));
        self.completed_at = if update.status.is_terminal() {
            self.completed_at.or(Some(update.at))
        } else {
            None
        };
        self.error = if update.status == BatchStatus::Failed {
            update.error.clone()
        } else {
            None
        };
        self.updated_at = update.at;
        true
    }

    /// Terminally cancel a non-terminal batch.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Cancelled;
        self.error = Some(CANCELLED_BY_USER.to_string());
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_batch() -> Batch {
        let new = NewBatch::new(UserId::new(), BatchScope::New, [JobId::new(), JobId::new()]);
        Batch::queued(BatchId::new(), &new, Utc::now())
    }

    #[test]
    fn new_batch_dedupes_job_ids_in_order() {
        let a = JobId::new();
        let b = JobId::new();
        let new = NewBatch::new(UserId::new(), BatchScope::New, [a, b, a, b, a]);
        assert_eq!(new.job_ids(), &[a, b]);
        assert_eq!(new.total_count(), 2);
    }

    #[test]
    fn started_only_from_queued() {
        let mut batch = queued_batch();
        let now = Utc::now();
        assert!(batch.mark_started(now));
        assert_eq!(batch.status, BatchStatus::Running);
        assert_eq!(batch.started_at, Some(now));
        assert!(!batch.mark_started(Utc::now()));
        assert_eq!(batch.started_at, Some(now));
    }

    #[test]
    fn completed_at_is_stamped_once() {
        let mut batch = queued_batch();
        let first = Utc::now();
        assert!(batch.apply_status(&BatchStatusUpdate {
            status: BatchStatus::Running,
            error: None,
            at: first,
        }));
        assert_eq!(batch.completed_at, None);
        assert_eq!(batch.started_at, Some(first));

        let done = first + chrono::Duration::seconds(5);
        assert!(batch.apply_status(&BatchStatusUpdate {
            status: BatchStatus::Failed,
            error: Some("boom".into()),
            at: done,
        }));
        assert_eq!(batch.completed_at, Some(done));
        assert_eq!(batch.error.as_deref(), Some("boom"));
        assert_eq!(batch.started_at, Some(first));
    }

    #[test]
    fn terminal_batch_ignores_updates_and_cancel() {
        let mut batch = queued_batch();
        assert!(batch.mark_cancelled(Utc::now()));
        let snapshot = batch.clone();

        assert!(!batch.apply_status(&BatchStatusUpdate {
            status: BatchStatus::Running,
            error: None,
            at: Utc::now(),
        }));
        assert!(!batch.mark_cancelled(Utc::now()));
        assert_eq!(batch, snapshot);
        assert_eq!(batch.error.as_deref(), Some(CANCELLED_BY_USER));
    }

    #[test]
    fn error_is_cleared_unless_failed() {
        let mut batch = queued_batch();
        batch.error = Some("stale".into());
        batch.apply_status(&BatchStatusUpdate {
            status: BatchStatus::Running,
            error: Some("ignored".into()),
            at: Utc::now(),
        });
        assert_eq!(batch.error, None);
    }
}
