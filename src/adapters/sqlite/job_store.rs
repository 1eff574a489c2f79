//! SQLite implementation of the JobStore port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::adapters::sqlite::{format_datetime, parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{QueueError, QueueResult};
use crate::domain::models::{Job, JobStatus, INTERRUPTED_ERROR};
use crate::domain::ports::{JobCounts, JobStore, Recovered};

/// Durable job store. The `dispatch_jobs` table is the only copy of job
/// state, so jobs survive process restarts.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    queue: String,
    kind: String,
    payload: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    created_at: String,
    run_after: String,
    completed_at: Option<String>,
    failed_at: Option<String>,
    error: Option<String>,
}

fn row_to_job(row: JobRow) -> QueueResult<Job> {
    let status: JobStatus = row.status.parse().map_err(QueueError::Serialization)?;
    Ok(Job {
        id: parse_uuid(&row.id)?,
        queue: row.queue,
        kind: row.kind,
        payload: serde_json::from_str(&row.payload)?,
        status,
        attempts: row.attempts as u32,
        max_attempts: row.max_attempts as u32,
        created_at: parse_datetime(&row.created_at)?,
        run_after: parse_datetime(&row.run_after)?,
        completed_at: parse_optional_datetime(row.completed_at)?,
        failed_at: parse_optional_datetime(row.failed_at)?,
        error: row.error,
    })
}

const JOB_COLUMNS: &str = "id, queue, kind, payload, status, attempts, max_attempts, \
     created_at, run_after, completed_at, failed_at, error";

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let payload = serde_json::to_string(&job.payload)?;

        sqlx::query(
            r#"INSERT INTO dispatch_jobs
               (id, queue, kind, payload, status, attempts, max_attempts,
                created_at, run_after, completed_at, failed_at, error)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(&job.queue)
        .bind(&job.kind)
        .bind(&payload)
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(job.max_attempts as i64)
        .bind(format_datetime(job.created_at))
        .bind(format_datetime(job.run_after))
        .bind(job.completed_at.map(format_datetime))
        .bind(job.failed_at.map(format_datetime))
        .bind(&job.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_due(&self, queue: &str, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // One statement, so concurrent claimers can never take the same row.
        let sql = format!(
            r#"UPDATE dispatch_jobs
               SET status = 'running', attempts = attempts + 1
               WHERE id IN (
                   SELECT id FROM dispatch_jobs
                   WHERE queue = ? AND status = 'pending' AND run_after <= ?
                   ORDER BY run_after ASC, created_at ASC
                   LIMIT ?
               )
               RETURNING {JOB_COLUMNS}"#
        );

        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(queue)
            .bind(format_datetime(now))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = rows.into_iter().map(row_to_job).collect::<QueueResult<Vec<_>>>()?;
        // RETURNING order is unspecified.
        jobs.sort_by(|a, b| a.run_after.cmp(&b.run_after).then(a.created_at.cmp(&b.created_at)));
        Ok(jobs)
    }

    async fn save(&self, job: &Job) -> QueueResult<()> {
        let result = sqlx::query(
            r#"UPDATE dispatch_jobs
               SET status = ?, attempts = ?, run_after = ?, completed_at = ?, failed_at = ?, error = ?
               WHERE id = ?"#,
        )
        .bind(job.status.as_str())
        .bind(job.attempts as i64)
        .bind(format_datetime(job.run_after))
        .bind(job.completed_at.map(format_datetime))
        .bind(job.failed_at.map(format_datetime))
        .bind(&job.error)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job.id));
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> QueueResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM dispatch_jobs WHERE id = ?");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_job).transpose()
    }

    async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM dispatch_jobs WHERE queue = ? GROUP BY status",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count as u64;
            match status.parse::<JobStatus>().map_err(QueueError::Serialization)? {
                JobStatus::Pending => counts.pending = count,
                JobStatus::Running => counts.running = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn recover_running(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Recovered> {
        let mut tx = self.pool.begin().await?;

        // Exhausted jobs first, so the requeue below only sees the rest.
        let failed = sqlx::query(
            r#"UPDATE dispatch_jobs
               SET status = 'failed', failed_at = ?, error = ?
               WHERE queue = ? AND status = 'running' AND attempts >= max_attempts"#,
        )
        .bind(format_datetime(now))
        .bind(INTERRUPTED_ERROR)
        .bind(queue)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let requeued = sqlx::query(
            "UPDATE dispatch_jobs SET status = 'pending' WHERE queue = ? AND status = 'running'",
        )
        .bind(queue)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(Recovered { requeued, failed })
    }
}
