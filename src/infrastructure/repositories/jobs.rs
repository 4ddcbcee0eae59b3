use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar};
use uuid::Uuid;

use super::unexpected;
use crate::domain::RepositoryError;
use crate::domain::ids::JobId;
use crate::domain::jobs::{Job, JobStatus, JobType, NewJob, backoff_delay};
use crate::domain::repositories::{JobCounts, JobRepository};
use crate::infrastructure::database::DatabasePool;

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, error, \
     created_at, updated_at, started_at, completed_at";

#[derive(Clone)]
pub struct SqlJobRepository {
    pool: DatabasePool,
}

impl SqlJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn into_domain(record: JobRecord) -> Result<Job, RepositoryError> {
        let job_type = JobType::parse(&record.job_type).ok_or_else(|| {
            RepositoryError::unexpected(format!("unknown job type: {}", record.job_type))
        })?;
        let status = JobStatus::parse(&record.status).ok_or_else(|| {
            RepositoryError::unexpected(format!("unknown job status: {}", record.status))
        })?;

        Ok(Job {
            id: JobId::from(record.id),
            job_type,
            payload: record.payload,
            status,
            attempts: record.attempts,
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        })
    }
}

#[async_trait]
impl JobRepository for SqlJobRepository {
    async fn enqueue(&self, job: NewJob) -> Result<Job, RepositoryError> {
        let payload_hash = job.payload_hash();

        // The no-op DO UPDATE makes RETURNING yield the surviving row when a
        // queued/running twin already exists.
        let sql = format!(
            "INSERT INTO jobs (job_type, payload, payload_hash) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (job_type, payload_hash) WHERE status IN ('queued', 'running') \
             DO UPDATE SET payload_hash = jobs.payload_hash \
             RETURNING {JOB_COLUMNS}"
        );

        let record = query_as::<_, JobRecord>(&sql)
            .bind(job.job_type.as_str())
            .bind(&job.payload)
            .bind(&payload_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        Self::into_domain(record)
    }

    async fn claim(&self, types: &[JobType]) -> Result<Option<Job>, RepositoryError> {
        let type_names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();

        let sql = format!(
            "UPDATE jobs SET status = 'running', started_at = now(), updated_at = now() \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE status = 'queued' \
                   AND updated_at <= now() \
                   AND job_type = ANY($1) \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {JOB_COLUMNS}"
        );

        let record = query_as::<_, JobRecord>(&sql)
            .bind(&type_names)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;

        record.map(Self::into_domain).transpose()
    }

    async fn complete(&self, id: JobId) -> Result<(), RepositoryError> {
        let result = query(
            "UPDATE jobs SET status = 'done', completed_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        max_attempts: i32,
        backoff_secs: &[u64],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let attempts: Option<i32> =
            query_scalar("SELECT attempts FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;
        let Some(attempts) = attempts else {
            return Err(RepositoryError::NotFound);
        };

        let attempts = attempts + 1;
        if attempts >= max_attempts {
            query(
                "UPDATE jobs SET status = 'error', attempts = $2, error = $3, \
                     completed_at = now(), updated_at = now() \
                 WHERE id = $1",
            )
            .bind(Uuid::from(id))
            .bind(attempts)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        } else {
            let delay = backoff_delay(attempts, backoff_secs);
            query(
                "UPDATE jobs SET status = 'queued', attempts = $2, error = $3, \
                     started_at = NULL, \
                     updated_at = now() + make_interval(secs => $4) \
                 WHERE id = $1",
            )
            .bind(Uuid::from(id))
            .bind(attempts)
            .bind(error)
            .bind(delay.as_secs_f64())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)
    }

    async fn sweep_stalled(&self, older_than: Duration) -> Result<u64, RepositoryError> {
        let result = query(
            "UPDATE jobs SET status = 'queued', started_at = NULL, updated_at = now() \
             WHERE status = 'running' \
               AND started_at < now() - make_interval(secs => $1)",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected())
    }

    async fn counts_since(&self, since: DateTime<Utc>) -> Result<JobCounts, RepositoryError> {
        let records = query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs WHERE updated_at >= $1 GROUP BY status",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut counts = JobCounts::default();
        for (status, count) in records {
            match status.as_str() {
                "queued" => counts.queued = count,
                "running" => counts.running = count,
                "done" => counts.done = count,
                "error" => counts.error = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn purge_terminal(&self, older_than: Duration) -> Result<u64, RepositoryError> {
        let result = query(
            "DELETE FROM jobs \
             WHERE status IN ('done', 'error') \
               AND updated_at < now() - make_interval(secs => $1)",
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRecord {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}
