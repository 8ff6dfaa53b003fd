use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use applyflow_batches::{JobDisplay, JobRecord, JobStatus};
use applyflow_core::{JobId, UserId};

use super::{CatalogError, CatalogResult, JobCatalog};

/// In-memory job catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobCatalog {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a job.
    pub fn upsert(&self, job: JobRecord) -> CatalogResult<JobId> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }
}

fn poisoned() -> CatalogError {
    CatalogError::Storage("job catalog lock poisoned".to_string())
}

#[async_trait::async_trait]
impl JobCatalog for InMemoryJobCatalog {
    async fn eligible_jobs(
        &self,
        user_id: UserId,
        selection: Option<&[JobId]>,
        limit: u32,
    ) -> CatalogResult<Vec<JobId>> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut eligible: Vec<&JobRecord> = jobs
            .values()
            .filter(|j| j.user_id == user_id && j.status == JobStatus::New)
            .filter(|j| selection.is_none_or(|selected| selected.contains(&j.id)))
            .collect();

        eligible.sort_by(|a, b| {
            (b.updated_at, b.created_at, b.id).cmp(&(a.updated_at, a.created_at, a.id))
        });
        if selection.is_none() {
            eligible.truncate(limit as usize);
        }
        Ok(eligible.into_iter().map(|j| j.id).collect())
    }

    async fn job_displays(
        &self,
        user_id: UserId,
        job_ids: &[JobId],
    ) -> CatalogResult<HashMap<JobId, JobDisplay>> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(job_ids
            .iter()
            .filter_map(|id| jobs.get(id))
            .filter(|j| j.user_id == user_id)
            .map(|j| (j.id, j.display()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn job_updated(user: UserId, title: &str, minutes_ago: i64) -> JobRecord {
        let mut job = JobRecord::new(user, title, format!("https://jobs.example/{title}"));
        job.updated_at = Utc::now() - Duration::minutes(minutes_ago);
        job
    }

    #[tokio::test]
    async fn eligible_jobs_are_new_and_newest_first() {
        let catalog = InMemoryJobCatalog::new();
        let user = UserId::new();
        let older = catalog.upsert(job_updated(user, "older", 10)).unwrap();
        let newer = catalog.upsert(job_updated(user, "newer", 1)).unwrap();
        catalog
            .upsert(job_updated(user, "applied", 0).with_status(JobStatus::Applied))
            .unwrap();
        catalog.upsert(job_updated(UserId::new(), "foreign", 0)).unwrap();

        let eligible = catalog.eligible_jobs(user, None, 100).await.unwrap();
        assert_eq!(eligible, vec![newer, older]);

        let limited = catalog.eligible_jobs(user, None, 1).await.unwrap();
        assert_eq!(limited, vec![newer]);
    }

    #[tokio::test]
    async fn selection_narrows_and_ignores_limit() {
        let catalog = InMemoryJobCatalog::new();
        let user = UserId::new();
        let a = catalog.upsert(job_updated(user, "a", 3)).unwrap();
        let b = catalog.upsert(job_updated(user, "b", 2)).unwrap();
        catalog.upsert(job_updated(user, "c", 1)).unwrap();

        let eligible = catalog
            .eligible_jobs(user, Some(&[a, b, JobId::new()]), 1)
            .await
            .unwrap();
        assert_eq!(eligible, vec![b, a]);
    }

    #[tokio::test]
    async fn displays_skip_foreign_and_missing_jobs() {
        let catalog = InMemoryJobCatalog::new();
        let user = UserId::new();
        let mine = catalog.upsert(job_updated(user, "mine", 0)).unwrap();
        let theirs = catalog.upsert(job_updated(UserId::new(), "theirs", 0)).unwrap();

        let displays = catalog
            .job_displays(user, &[mine, theirs, JobId::new()])
            .await
            .unwrap();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[&mine].title, "mine");
        assert!(catalog.job_display(user, theirs).await.unwrap().is_none());
    }
}
