//! Repository for job lifecycle rows.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use curator_model::{Job, JobId, JobStatus, JobType};

use crate::error::{CuratorError, Result};

#[derive(Clone, Debug)]
pub struct JobRepository {
    pool: PgPool,
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let job_type: String = row.try_get("job_type")?;
    let status: String = row.try_get("status")?;
    Ok(Job {
        id: JobId(row.try_get::<uuid::Uuid, _>("id")?),
        job_type: job_type.parse::<JobType>().map_err(CuratorError::Internal)?,
        status: status.parse::<JobStatus>().map_err(CuratorError::Internal)?,
        metadata: row
            .try_get::<Option<Value>, _>("metadata")?
            .unwrap_or(Value::Null),
        progress: row.try_get("progress")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        updated_at: row.try_get("updated_at")?,
        result: row.try_get("result")?,
    })
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, status, metadata, progress, message,
                created_at, started_at, completed_at, updated_at, result
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id.0)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(&job.metadata)
        .bind(job.progress)
        .bind(&job.message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .bind(&job.result)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_active(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE status IN ('PENDING', 'RUNNING') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    pub async fn mark_running(&self, id: JobId) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = $2, started_at = $3, updated_at = $3 WHERE id = $1",
        )
        .bind(id.0)
        .bind(JobStatus::Running.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal transition; sets `completed_at` exactly once.
    pub async fn finish(
        &self,
        id: JobId,
        status: JobStatus,
        message: Option<&str>,
        result: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                message = COALESCE($3, message),
                result = COALESCE($4, result),
                progress = CASE WHEN $2 = 'COMPLETED' THEN 100 ELSE progress END,
                completed_at = $5,
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(message)
        .bind(result)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_progress(&self, id: JobId, progress: f64, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET progress = $2, message = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.0)
        .bind(progress.clamp(0.0, 100.0))
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stale-job reaping: RUNNING jobs whose last progress write is
    /// older than the cutoff are marked FAILED.
    pub async fn fail_stale_running(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'FAILED',
                message = 'stale job reaped',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = 'RUNNING' AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// PENDING jobs nobody picked up within the cutoff are cancelled.
    pub async fn cancel_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'CANCELLED',
                message = 'expired before execution',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE status = 'PENDING' AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
