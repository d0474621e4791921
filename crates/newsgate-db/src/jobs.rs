//! Postgres job queue.
//!
//! Workers reserve jobs with `FOR UPDATE SKIP LOCKED`, so any number of
//! processes can poll the same table without double-processing a job.
//! Failed jobs are re-queued with exponential back-off until their attempt
//! budget is spent, then parked as `dead`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsgate_core::{FailureDisposition, JobQueue, NewJob, QueuedJob};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `jobs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: i64,
    pub name: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_secs: i64,
    pub run_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReservedRow {
    id: i64,
    name: String,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct FailedRow {
    status: String,
    run_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the insert fails.
    pub async fn insert_job(&self, job: &NewJob) -> Result<i64, DbError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO jobs (name, payload, max_attempts, backoff_secs) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(&job.name)
        .bind(&job.payload)
        .bind(to_i32(job.options.attempts.max(1)))
        .bind(to_i64(job.options.backoff_secs))
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Inserts `jobs` in one transaction; either all are queued or none.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if any insert or the commit fails.
    pub async fn insert_jobs(&self, jobs: &[NewJob]) -> Result<Vec<i64>, DbError> {
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO jobs (name, payload, max_attempts, backoff_secs) \
                 VALUES ($1, $2, $3, $4) RETURNING id",
            )
            .bind(&job.name)
            .bind(&job.payload)
            .bind(to_i32(job.options.attempts.max(1)))
            .bind(to_i64(job.options.backoff_secs))
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Claims the oldest runnable job named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the update fails.
    pub async fn reserve_job(&self, name: &str) -> Result<Option<QueuedJob>, DbError> {
        let row = sqlx::query_as::<_, ReservedRow>(
            "UPDATE jobs \
             SET status = 'running', attempts = attempts + 1, locked_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE name = $1 AND status = 'queued' AND run_at <= NOW() \
                 ORDER BY run_at, id \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             RETURNING id, name, payload, attempts, max_attempts",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| QueuedJob {
            id: r.id,
            name: r.name,
            payload: r.payload,
            attempt: u32::try_from(r.attempts).unwrap_or(0),
            max_attempts: u32::try_from(r.max_attempts).unwrap_or(1),
        }))
    }

    /// Marks a running job as done.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::JobNotRunning`] if the job is not in `running`
    /// state, or [`DbError::Sqlx`] if the update fails.
    pub async fn complete_job(&self, id: i64) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'done', locked_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::JobNotRunning { id });
        }
        Ok(())
    }

    /// Records a failed attempt. The job is re-queued after
    /// `backoff_secs * 2^(attempts - 1)` or parked as `dead` when its
    /// attempts are used up.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::JobNotRunning`] if the job is not in `running`
    /// state, or [`DbError::Sqlx`] if the update fails.
    pub async fn fail_job(&self, id: i64, error: &str) -> Result<FailureDisposition, DbError> {
        let row = sqlx::query_as::<_, FailedRow>(
            "UPDATE jobs SET \
                 status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'queued' END, \
                 run_at = CASE \
                     WHEN attempts >= max_attempts THEN run_at \
                     ELSE NOW() + make_interval( \
                         secs => (backoff_secs * power(2, LEAST(GREATEST(attempts - 1, 0), 16)))::float8) \
                 END, \
                 last_error = $2, locked_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'running' \
             RETURNING status, run_at",
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::JobNotRunning { id })?;

        if row.status == "dead" {
            tracing::warn!(job_id = id, error, "job exhausted its attempts");
            Ok(FailureDisposition::Dead)
        } else {
            Ok(FailureDisposition::Retrying { run_at: row.run_at })
        }
    }

    /// Recovers jobs stuck in `running` for longer than `older_than`, left
    /// behind by workers that died mid-job. A job with attempts to spare goes
    /// back in the queue; one whose last attempt was in flight is parked as
    /// `dead`, so a job that kills its worker cannot loop forever.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the update fails.
    pub async fn requeue_stale(&self, older_than: Duration) -> Result<StaleJobs, DbError> {
        let statuses: Vec<String> = sqlx::query_scalar(
            "UPDATE jobs SET \
                 status = CASE WHEN attempts >= max_attempts THEN 'dead' ELSE 'queued' END, \
                 last_error = CASE \
                     WHEN attempts >= max_attempts THEN 'worker lost while running final attempt' \
                     ELSE last_error \
                 END, \
                 locked_at = NULL, run_at = NOW(), updated_at = NOW() \
             WHERE status = 'running' AND locked_at < NOW() - make_interval(secs => $1::float8) \
             RETURNING status",
        )
        .bind(older_than.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        let dead = statuses.iter().filter(|s| s.as_str() == "dead").count();
        Ok(StaleJobs {
            requeued: statuses.len() - dead,
            dead,
        })
    }

    /// Deletes finished and dead jobs last touched before `older_than` ago.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the delete fails.
    pub async fn purge_finished(&self, older_than: Duration) -> Result<u64, DbError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('done', 'dead') \
             AND updated_at < NOW() - make_interval(secs => $1::float8)",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Fetches one job by id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::NotFound`] if no such job exists.
    pub async fn get_job(&self, id: i64) -> Result<JobRow, DbError> {
        sqlx::query_as::<_, JobRow>(
            "SELECT id, name, payload, status, attempts, max_attempts, backoff_secs, run_at, \
                    locked_at, last_error, created_at, updated_at \
             FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)
    }
}

/// What [`PgJobQueue::requeue_stale`] did with the stale jobs it found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleJobs {
    pub requeued: usize,
    pub dead: usize,
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: NewJob) -> anyhow::Result<i64> {
        Ok(self.insert_job(&job).await?)
    }

    async fn enqueue_batch(&self, jobs: Vec<NewJob>) -> anyhow::Result<Vec<i64>> {
        Ok(self.insert_jobs(&jobs).await?)
    }

    async fn reserve(&self, job_name: &str) -> anyhow::Result<Option<QueuedJob>> {
        Ok(self.reserve_job(job_name).await?)
    }

    async fn complete(&self, job_id: i64) -> anyhow::Result<()> {
        Ok(self.complete_job(job_id).await?)
    }

    async fn fail(&self, job_id: i64, error: &str) -> anyhow::Result<FailureDisposition> {
        Ok(self.fail_job(job_id, error).await?)
    }
}
