//! Publish job queue repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use vfs_core::{
    new_v7, Error, JobStatus, PublishJob, PublishJobRepository, PublishScope, Result, UserContext,
};

const JOB_COLUMNS: &str = "id, user_id, user_name, scope, status, history_id, error_message, \
                           created_at, started_at, completed_at";

/// PostgreSQL implementation of PublishJobRepository.
#[derive(Clone)]
pub struct PgPublishJobRepository {
    pool: Pool<Postgres>,
}

impl PgPublishJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a job row into a PublishJob.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<PublishJob> {
        let scope: serde_json::Value = row.get("scope");
        let status: String = row.get("status");
        Ok(PublishJob {
            id: row.get("id"),
            user_id: row.get("user_id"),
            user_name: row.get("user_name"),
            scope: serde_json::from_value::<PublishScope>(scope)?,
            status: status.parse::<JobStatus>()?,
            history_id: row.get("history_id"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    async fn count_with_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vfs_publish_job WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count)
    }
}

#[async_trait]
impl PublishJobRepository for PgPublishJobRepository {
    async fn queue(&self, ctx: &UserContext, scope: PublishScope) -> Result<Uuid> {
        let job_id = new_v7();
        let scope = serde_json::to_value(&scope)?;

        sqlx::query(
            "INSERT INTO vfs_publish_job (id, user_id, user_name, scope, status, created_at)
             VALUES ($1, $2, $3, $4, 'pending', $5)",
        )
        .bind(job_id)
        .bind(ctx.user_id)
        .bind(&ctx.user_name)
        .bind(&scope)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(job_id)
    }

    async fn claim_next(&self) -> Result<Option<PublishJob>> {
        // SKIP LOCKED lets several workers poll the same queue.
        let row = sqlx::query(&format!(
            "UPDATE vfs_publish_job
             SET status = 'running', started_at = $1
             WHERE id = (
                 SELECT id FROM vfs_publish_job
                 WHERE status = 'pending'
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(&self, job_id: Uuid, history_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE vfs_publish_job
             SET status = 'completed', history_id = $1, completed_at = $2
             WHERE id = $3",
        )
        .bind(history_id)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("publish job {}", job_id)));
        }
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE vfs_publish_job
             SET status = 'failed', error_message = $1, completed_at = $2
             WHERE id = $3",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("publish job {}", job_id)));
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<PublishJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM vfs_publish_job WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn pending_count(&self) -> Result<i64> {
        self.count_with_status(JobStatus::Pending).await
    }

    async fn running_count(&self) -> Result<i64> {
        self.count_with_status(JobStatus::Running).await
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<PublishJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM vfs_publish_job
             ORDER BY created_at DESC, id DESC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM vfs_publish_job
             WHERE status IN ('completed', 'failed')
               AND id NOT IN (
                   SELECT id FROM vfs_publish_job
                   WHERE status IN ('completed', 'failed')
                   ORDER BY created_at DESC, id DESC
                   LIMIT $1
               )",
        )
        .bind(keep_count)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
