//! Per-status task counts and the batch status derived from them.

use serde::{Deserialize, Serialize};

use crate::status::{BatchStatus, TaskStatus};

/// Batch-level error used when a failed batch has no task error to surface.
pub const DEFAULT_BATCH_FAILURE: &str = "One or more tasks failed.";

/// Task counts for one batch, keyed by task status.
///
/// Always sums to the number of tasks that currently exist in the batch,
/// which for a retry batch is smaller than the original's `total_count`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchProgress {
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl BatchProgress {
    pub fn new(pending: u64, running: u64, succeeded: u64, failed: u64, skipped: u64) -> Self {
        Self {
            pending,
            running,
            succeeded,
            failed,
            skipped,
        }
    }

    /// Build counts from a sequence of task statuses.
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut progress = Self::default();
        for status in statuses {
            progress.record(status, 1);
        }
        progress
    }

    /// Add `count` tasks of `status`.
    pub fn record(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::Running => self.running += count,
            TaskStatus::Succeeded => self.succeeded += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Skipped => self.skipped += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.succeeded + self.failed + self.skipped
    }

    /// Tasks that have not reached a terminal state.
    pub fn remaining(&self) -> u64 {
        self.pending + self.running
    }

    /// Derive the status a non-terminal batch should hold for these counts.
    ///
    /// Unfinished work dominates, then any failure dominates success. Returns
    /// `None` when no task exists, in which case the batch is left unchanged.
    pub fn derive_status(&self) -> Option<BatchStatus> {
        if self.pending > 0 || self.running > 0 {
            Some(BatchStatus::Running)
        } else if self.failed > 0 {
            Some(BatchStatus::Failed)
        } else if self.succeeded > 0 || self.skipped > 0 {
            Some(BatchStatus::Succeeded)
        } else {
            None
        }
    }
}
