//! Postgres-backed batch store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation on the active-batch index) | `23505` | `ActiveBatchExists` |
//! | Database (other unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / RowNotFound / other | N/A | `Storage` |
//!
//! Guarded writes are single `UPDATE ... WHERE status = ...` statements; the
//! number of affected rows becomes the [`UpdateOutcome`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use applyflow_batches::{
    Batch, BatchProgress, BatchScope, BatchStatus, BatchStatusUpdate, CompletionStatus, NewBatch,
    Task, TaskStatus,
};
use applyflow_core::{BatchId, JobId, TaskId, UserId};

use super::{BatchStore, StoreError, StoreResult, TaskOrder, TaskQuery, UpdateOutcome};

const ACTIVE_BATCH_INDEX: &str = "application_batches_one_active_per_user";

const BATCH_COLUMNS: &str = "id, user_id, scope, status, total_count, error, \
     created_at, updated_at, started_at, completed_at";

const TASK_COLUMNS: &str = "id, seq, batch_id, user_id, job_id, status, attempt, error, \
     created_at, updated_at, started_at, completed_at";

/// Postgres-backed batch store.
///
/// Every batch query includes `user_id` in the WHERE clause, so a foreign
/// batch is indistinguishable from a missing one.
#[derive(Debug, Clone)]
pub struct PostgresBatchStore {
    pool: Arc<PgPool>,
}

impl PostgresBatchStore {
    /// Create a new PostgresBatchStore with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply the bundled schema. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(include_str!("../../migrations/0001_application_batches.sql"))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn insert_tasks(
        tx: &mut Transaction<'_, Postgres>,
        batch: &Batch,
        job_ids: &[JobId],
    ) -> StoreResult<()> {
        for job_id in job_ids {
            sqlx::query(
                r#"
                INSERT INTO application_batch_tasks (
                    id, batch_id, user_id, job_id, status, attempt, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, 'PENDING', 0, $5, $5)
                ON CONFLICT (batch_id, job_id) DO NOTHING
                "#,
            )
            .bind(TaskId::new().as_uuid())
            .bind(batch.id.as_uuid())
            .bind(batch.user_id.as_uuid())
            .bind(job_id.as_uuid())
            .bind(batch.created_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_task", e))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BatchStore for PostgresBatchStore {
    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    async fn find_batch(&self, user_id: UserId, batch_id: BatchId) -> StoreResult<Option<Batch>> {
        let row = sqlx::query(&format!(
            "SELECT {BATCH_COLUMNS} FROM application_batches WHERE id = $1 AND user_id = $2"
        ))
        .bind(batch_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_batch", e))?;

        row.as_ref().map(batch_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn find_active_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM application_batches
            WHERE user_id = $1 AND status IN ('QUEUED', 'RUNNING')
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_active_batch", e))?;

        row.as_ref().map(batch_from_row).transpose()
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn latest_batch(&self, user_id: UserId) -> StoreResult<Option<Batch>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BATCH_COLUMNS}
            FROM application_batches
            WHERE user_id = $1
            ORDER BY updated_at DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("latest_batch", e))?;

        row.as_ref().map(batch_from_row).transpose()
    }

    #[instrument(
        skip(self, new),
        fields(user_id = %new.user_id, job_count = new.job_ids().len()),
        err
    )]
    async fn create_batch(&self, new: NewBatch, now: DateTime<Utc>) -> StoreResult<Batch> {
        let batch = Batch::queued(BatchId::new(), &new, now);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO application_batches (
                id, user_id, scope, status, total_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(batch.id.as_uuid())
        .bind(batch.user_id.as_uuid())
        .bind(batch.scope.as_str())
        .bind(batch.status.as_str())
        .bind(batch.total_count as i32)
        .bind(now)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            let lost_race = violated_constraint(&err) == Some(ACTIVE_BATCH_INDEX);
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            if lost_race {
                if let Some(active) = self.find_active_batch(new.user_id).await? {
                    return Err(StoreError::ActiveBatchExists {
                        batch_id: active.id,
                        status: active.status,
                    });
                }
            }
            return Err(map_sqlx_error("insert_batch", err));
        }

        Self::insert_tasks(&mut tx, &batch, new.job_ids()).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(batch)
    }

    #[instrument(skip(self), fields(user_id = %user_id, batch_id = %batch_id), err)]
    async fn mark_batch_started(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE application_batches
            SET status = 'RUNNING', started_at = $3, updated_at = $3
            WHERE id = $1 AND user_id = $2 AND status = 'QUEUED'
            "#,
        )
        .bind(batch_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_batch_started", e))?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }

    #[instrument(
        skip(self, update),
        fields(user_id = %user_id, batch_id = %batch_id, status = %update.status),
        err
    )]
    async fn update_batch_status(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        update: &BatchStatusUpdate,
    ) -> StoreResult<UpdateOutcome> {
        let error = match update.status {
            BatchStatus::Failed => update.error.as_deref(),
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE application_batches
            SET status = $3,
                error = $4,
                started_at = COALESCE(started_at, $5),
                completed_at = CASE WHEN $6 THEN COALESCE(completed_at, $5) ELSE NULL END,
                updated_at = $5
            WHERE id = $1 AND user_id = $2 AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(batch_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(update.status.as_str())
        .bind(error)
        .bind(update.at)
        .bind(update.status.is_terminal())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_batch_status", e))?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }

    #[instrument(
        skip(self, reason),
        fields(user_id = %user_id, batch_id = %batch_id, swept = tracing::field::Empty),
        err
    )]
    async fn cancel_batch(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let cancelled = sqlx::query(
            r#"
            UPDATE application_batches
            SET status = 'CANCELLED', error = $3, completed_at = $4, updated_at = $4
            WHERE id = $1 AND user_id = $2 AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(batch_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("cancel_batch", e))?;

        if cancelled.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(UpdateOutcome::Conflict);
        }

        let swept = sqlx::query(
            r#"
            UPDATE application_batch_tasks
            SET status = 'SKIPPED', error = $2, completed_at = $3, updated_at = $3
            WHERE batch_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(batch_id.as_uuid())
        .bind(reason)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("sweep_pending_tasks", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        tracing::Span::current().record("swept", swept.rows_affected());
        Ok(UpdateOutcome::Applied)
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn task_progress(&self, batch_id: BatchId) -> StoreResult<BatchProgress> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM application_batch_tasks
            WHERE batch_id = $1
            GROUP BY status
            "#,
        )
        .bind(batch_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("task_progress", e))?;

        let mut progress = BatchProgress::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(corrupt("status"))?;
            let count: i64 = row.try_get("count").map_err(corrupt("count"))?;
            let status = status
                .parse::<TaskStatus>()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            progress.record(status, count as u64);
        }
        Ok(progress)
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn oldest_pending_task(&self, batch_id: BatchId) -> StoreResult<Option<Task>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM application_batch_tasks
            WHERE batch_id = $1 AND status = 'PENDING'
            ORDER BY seq ASC
            LIMIT 1
            "#
        ))
        .bind(batch_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("oldest_pending_task", e))?;

        row.as_ref().map(task_from_row).transpose()
    }

    #[instrument(skip(self), fields(task_id = %task_id), err)]
    async fn claim_task(&self, task_id: TaskId, now: DateTime<Utc>) -> StoreResult<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE application_batch_tasks
            SET status = 'RUNNING',
                attempt = attempt + 1,
                error = NULL,
                started_at = $2,
                completed_at = NULL,
                updated_at = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_task", e))?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }

    #[instrument(
        skip(self),
        fields(user_id = %user_id, batch_id = %batch_id, task_id = %task_id),
        err
    )]
    async fn find_task(
        &self,
        user_id: UserId,
        batch_id: BatchId,
        task_id: TaskId,
    ) -> StoreResult<Option<Task>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM application_batch_tasks
            WHERE id = $1 AND batch_id = $2 AND user_id = $3
            "#
        ))
        .bind(task_id.as_uuid())
        .bind(batch_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_task", e))?;

        row.as_ref().map(task_from_row).transpose()
    }

    #[instrument(skip(self, error), fields(task_id = %task_id, status = ?status), err)]
    async fn complete_task(
        &self,
        task_id: TaskId,
        status: CompletionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StoreResult<UpdateOutcome> {
        let status: TaskStatus = status.into();
        let result = sqlx::query(
            r#"
            UPDATE application_batch_tasks
            SET status = $2, error = $3, completed_at = $4, updated_at = $4
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(task_id.as_uuid())
        .bind(status.as_str())
        .bind(error)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_task", e))?;

        Ok(UpdateOutcome::from_rows_affected(result.rows_affected()))
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn list_tasks(&self, batch_id: BatchId, query: TaskQuery) -> StoreResult<Vec<Task>> {
        let order_by = match query.order {
            TaskOrder::Sequence => "seq ASC",
            TaskOrder::UpdatedDesc => "updated_at DESC, seq DESC",
            TaskOrder::CompletedDesc => "COALESCE(completed_at, updated_at) DESC, updated_at DESC, seq DESC",
        };

        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM application_batch_tasks
            WHERE batch_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY {order_by}
            LIMIT $3
            "#
        ))
        .bind(batch_id.as_uuid())
        .bind(query.status.map(TaskStatus::as_str))
        .bind(query.limit.map(|limit| limit as i64))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_tasks", e))?;

        rows.iter().map(task_from_row).collect()
    }

    #[instrument(skip(self), fields(batch_id = %batch_id), err)]
    async fn requeue_stale_tasks(
        &self,
        batch_id: BatchId,
        started_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE application_batch_tasks
            SET status = 'PENDING', started_at = NULL, completed_at = NULL, updated_at = $3
            WHERE batch_id = $1 AND status = 'RUNNING' AND started_at <= $2
              AND EXISTS (
                  SELECT 1 FROM application_batches b
                  WHERE b.id = $1 AND b.status IN ('QUEUED', 'RUNNING')
              )
            "#,
        )
        .bind(batch_id.as_uuid())
        .bind(started_before)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("requeue_stale_tasks", e))?;

        Ok(result.rows_affected())
    }
}

fn batch_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Batch> {
    let scope: String = row.try_get("scope").map_err(corrupt("scope"))?;
    let status: String = row.try_get("status").map_err(corrupt("status"))?;
    let total_count: i32 = row.try_get("total_count").map_err(corrupt("total_count"))?;

    Ok(Batch {
        id: BatchId::from_uuid(row.try_get("id").map_err(corrupt("id"))?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt("user_id"))?),
        scope: scope
            .parse::<BatchScope>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        status: status
            .parse::<BatchStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        total_count: total_count.max(0) as u32,
        error: row.try_get("error").map_err(corrupt("error"))?,
        created_at: row.try_get("created_at").map_err(corrupt("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(corrupt("updated_at"))?,
        started_at: row.try_get("started_at").map_err(corrupt("started_at"))?,
        completed_at: row.try_get("completed_at").map_err(corrupt("completed_at"))?,
    })
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Task> {
    let status: String = row.try_get("status").map_err(corrupt("status"))?;
    let seq: i64 = row.try_get("seq").map_err(corrupt("seq"))?;
    let attempt: i32 = row.try_get("attempt").map_err(corrupt("attempt"))?;

    Ok(Task {
        id: TaskId::from_uuid(row.try_get("id").map_err(corrupt("id"))?),
        batch_id: BatchId::from_uuid(row.try_get("batch_id").map_err(corrupt("batch_id"))?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(corrupt("user_id"))?),
        job_id: JobId::from_uuid(row.try_get("job_id").map_err(corrupt("job_id"))?),
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        attempt: attempt.max(0) as u32,
        error: row.try_get("error").map_err(corrupt("error"))?,
        sequence: seq as u64,
        created_at: row.try_get("created_at").map_err(corrupt("created_at"))?,
        updated_at: row.try_get("updated_at").map_err(corrupt("updated_at"))?,
        started_at: row.try_get("started_at").map_err(corrupt("started_at"))?,
        completed_at: row.try_get("completed_at").map_err(corrupt("completed_at"))?,
    })
}

fn corrupt(column: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| StoreError::Corrupt(format!("failed to read {column}: {e}"))
}

/// Name of the violated unique constraint, if `err` is a unique violation.
fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            db_err.constraint()
        }
        _ => None,
    }
}

/// Map SQLx errors to StoreError.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::RowNotFound => {
            StoreError::Storage(format!("unexpected row not found in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
