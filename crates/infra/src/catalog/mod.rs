//! Read-only view of the user's job catalog.
//!
//! The runner only needs to know which jobs may seed a batch and how to
//! display a task's job; ownership of the jobs themselves stays elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use applyflow_batches::JobDisplay;
use applyflow_core::{JobId, UserId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryJobCatalog;
pub use postgres::PostgresJobCatalog;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("corrupt job row: {0}")]
    Corrupt(String),
    #[error("catalog storage error: {0}")]
    Storage(String),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[async_trait::async_trait]
pub trait JobCatalog: Send + Sync {
    /// The user's `NEW` jobs, most recently updated first.
    ///
    /// With a `selection`, only selected jobs are returned and `limit` is not
    /// applied; otherwise at most `limit` jobs are returned.
    async fn eligible_jobs(
        &self,
        user_id: UserId,
        selection: Option<&[JobId]>,
        limit: u32,
    ) -> CatalogResult<Vec<JobId>>;

    /// Display fields for the given jobs. Unknown or foreign ids are absent
    /// from the result.
    async fn job_displays(
        &self,
        user_id: UserId,
        job_ids: &[JobId],
    ) -> CatalogResult<HashMap<JobId, JobDisplay>>;

    async fn job_display(&self, user_id: UserId, job_id: JobId) -> CatalogResult<Option<JobDisplay>> {
        let mut displays = self.job_displays(user_id, &[job_id]).await?;
        Ok(displays.remove(&job_id))
    }
}

#[async_trait::async_trait]
impl<C> JobCatalog for Arc<C>
where
    C: JobCatalog + ?Sized,
{
    async fn eligible_jobs(
        &self,
        user_id: UserId,
        selection: Option<&[JobId]>,
        limit: u32,
    ) -> CatalogResult<Vec<JobId>> {
        (**self).eligible_jobs(user_id, selection, limit).await
    }

    async fn job_displays(
        &self,
        user_id: UserId,
        job_ids: &[JobId],
    ) -> CatalogResult<HashMap<JobId, JobDisplay>> {
        (**self).job_displays(user_id, job_ids).await
    }

    async fn job_display(&self, user_id: UserId, job_id: JobId) -> CatalogResult<Option<JobDisplay>> {
        (**self).job_display(user_id, job_id).await
    }
}
