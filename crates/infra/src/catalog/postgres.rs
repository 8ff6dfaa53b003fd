//! Postgres-backed job catalog (reads the `jobs` table).

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use applyflow_batches::JobDisplay;
use applyflow_core::{JobId, UserId};

use super::{CatalogError, CatalogResult, JobCatalog};

#[derive(Debug, Clone)]
pub struct PostgresJobCatalog {
    pool: Arc<PgPool>,
}

impl PostgresJobCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl JobCatalog for PostgresJobCatalog {
    #[instrument(skip(self, selection), fields(user_id = %user_id), err)]
    async fn eligible_jobs(
        &self,
        user_id: UserId,
        selection: Option<&[JobId]>,
        limit: u32,
    ) -> CatalogResult<Vec<JobId>> {
        let selected: Option<Vec<Uuid>> =
            selection.map(|ids| ids.iter().map(|id| *id.as_uuid()).collect());
        let limit: Option<i64> = match selection {
            Some(_) => None,
            None => Some(i64::from(limit)),
        };

        let rows = sqlx::query(
            r#"
            SELECT id
            FROM jobs
            WHERE user_id = $1
                AND status = 'NEW'
                AND ($2::uuid[] IS NULL OR id = ANY($2))
            ORDER BY updated_at DESC, created_at DESC
            LIMIT $3
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(selected)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("eligible_jobs", e))?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(JobId::from_uuid)
                    .map_err(|e| CatalogError::Corrupt(format!("failed to read id: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self, job_ids), fields(user_id = %user_id, job_count = job_ids.len()), err)]
    async fn job_displays(
        &self,
        user_id: UserId,
        job_ids: &[JobId],
    ) -> CatalogResult<HashMap<JobId, JobDisplay>> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<Uuid> = job_ids.iter().map(|id| *id.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, title, company, job_url
            FROM jobs
            WHERE user_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_displays", e))?;

        let mut displays = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.try_get("id").map_err(corrupt)?;
            let display = JobDisplay {
                title: row.try_get("title").map_err(corrupt)?,
                company: row.try_get("company").map_err(corrupt)?,
                url: row.try_get("job_url").map_err(corrupt)?,
            };
            displays.insert(JobId::from_uuid(id), display);
        }
        Ok(displays)
    }
}

fn corrupt(err: sqlx::Error) -> CatalogError {
    CatalogError::Corrupt(format!("failed to decode job row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CatalogError {
    match err {
        sqlx::Error::Database(db_err) => {
            CatalogError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        _ => CatalogError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
