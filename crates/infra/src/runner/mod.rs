//! Application batch runner.
//!
//! A purely reactive task queue: every operation is a bounded sequence of
//! store round trips, and all coordination between concurrent callers is
//! pushed into the store's guarded writes.
//!
//! Callers loop `claim -> (external work) -> complete` until a claim reports
//! `done` or `terminal`. Cancel and retry are out-of-band.

use applyflow_batches::{BatchStatus, TaskStatus};
use applyflow_core::{BatchId, DomainError};

use crate::catalog::{CatalogError, JobCatalog};
use crate::config::RunnerConfig;
use crate::store::{BatchStore, StoreError};

mod cancel;
mod claim;
mod complete;
mod create;
mod drive;
mod outcome;
mod reconcile;
mod retry;
mod run_once;
mod views;

pub use drive::{DriveReport, DriveStep, TaskWorker, WorkOutcome};
pub use outcome::{
    BatchDetail, BatchSummary, CancelOutcome, ClaimOutcome, ClaimedTask, CompletionOutcome,
    Reconciled, RetryOutcome, TaskView,
};
pub use run_once::{CompletionReport, RunOnceReport, RunOnceRequest, StopReason, TaskCompletion};

/// Why an otherwise valid request cannot be applied to the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidState {
    #[error("task is {current}, not RUNNING")]
    TaskNotRunning { current: TaskStatus },

    #[error("an active batch already exists ({batch_id}, {status})")]
    ActiveBatchExists { batch_id: BatchId, status: BatchStatus },

    #[error("source batch has no failed tasks")]
    NoFailedTasks,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    /// Missing, or owned by another user.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid state: {0}")]
    InvalidState(#[from] InvalidState),

    #[error("no eligible jobs")]
    NoEligibleJobs,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl RunnerError {
    /// Stable, machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::NotFound(_) => "NOT_FOUND",
            RunnerError::InvalidState(InvalidState::ActiveBatchExists { .. }) => {
                "ACTIVE_BATCH_EXISTS"
            }
            RunnerError::InvalidState(_) => "INVALID_STATE",
            RunnerError::NoEligibleJobs => "NO_ELIGIBLE_JOBS",
            RunnerError::Validation(_) => "INVALID_BODY",
            RunnerError::Store(_) | RunnerError::Catalog(_) => "STORE_ERROR",
        }
    }

    /// Expected outcomes a claim/complete loop logs and moves past.
    pub fn is_soft(&self) -> bool {
        matches!(self, RunnerError::NotFound(_) | RunnerError::InvalidState(_))
    }
}

impl From<StoreError> for RunnerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ActiveBatchExists { batch_id, status } => {
                RunnerError::InvalidState(InvalidState::ActiveBatchExists { batch_id, status })
            }
            other => RunnerError::Store(other),
        }
    }
}

impl From<DomainError> for RunnerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => RunnerError::Validation(msg),
        }
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Runs batches against a [`BatchStore`] and a [`JobCatalog`].
///
/// Holds no mutable state of its own; share it freely (e.g. behind an `Arc`).
#[derive(Debug, Clone)]
pub struct BatchRunner<S, C> {
    store: S,
    catalog: C,
    config: RunnerConfig,
}

impl<S, C> BatchRunner<S, C>
where
    S: BatchStore,
    C: JobCatalog,
{
    pub fn new(store: S, catalog: C, config: RunnerConfig) -> Self {
        Self {
            store,
            catalog,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_batch_conflicts_surface_as_invalid_state() {
        let batch_id = BatchId::new();
        let err = RunnerError::from(StoreError::ActiveBatchExists {
            batch_id,
            status: BatchStatus::Running,
        });
        assert_eq!(err.code(), "ACTIVE_BATCH_EXISTS");
        assert!(err.is_soft());
        assert!(matches!(
            err,
            RunnerError::InvalidState(InvalidState::ActiveBatchExists { .. })
        ));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(RunnerError::NotFound("batch").code(), "NOT_FOUND");
        assert_eq!(
            RunnerError::from(InvalidState::NoFailedTasks).code(),
            "INVALID_STATE"
        );
        assert_eq!(RunnerError::NoEligibleJobs.code(), "NO_ELIGIBLE_JOBS");
        assert_eq!(
            RunnerError::from(StoreError::Storage("down".into())).code(),
            "STORE_ERROR"
        );
        assert!(!RunnerError::NoEligibleJobs.is_soft());
    }
}
