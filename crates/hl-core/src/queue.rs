use anyhow::Result;
use serde_json::Value;
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;

use crate::metrics;

pub const QUEUE_NOTIFICATIONS: &str = "notifications";
pub const QUEUE_SMART_ALBUM: &str = "smart-album";
pub const JOB_CREATE_NOTIFICATION: &str = "create";
pub const JOB_PROCESS_SMART_ALBUM: &str = "process";

/// Workers LISTEN here; `enqueue` notifies with the queue name.
pub const JOBS_CHANNEL: &str = "hl_jobs";

const MAX_BACKOFF_EXPONENT: u32 = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobOptions {
    pub max_attempts: i32,
    pub backoff_base: Duration,
}

impl JobOptions {
    pub const fn notifications() -> Self {
        Self {
            max_attempts: 1,
            backoff_base: Duration::ZERO,
        }
    }

    pub const fn smart_album() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(2000),
        }
    }
}

/// How many finished jobs of a queue are kept, newest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_completed: i64,
    pub keep_failed: i64,
}

pub fn retention_for(queue: &str) -> RetentionPolicy {
    match queue {
        QUEUE_NOTIFICATIONS => RetentionPolicy {
            keep_completed: 500,
            keep_failed: 1000,
        },
        _ => RetentionPolicy {
            keep_completed: 100,
            keep_failed: 500,
        },
    }
}

#[derive(Clone, Debug)]
pub struct Job {
    pub job_id: String,
    pub queue: String,
    pub job_type: String,
    pub payload: Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_base_ms: i64,
}

impl Job {
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Retrying(Duration),
    Failed,
}

/// Exponential backoff: `base * 2^(attempts - 1)`.
pub fn backoff_delay(base_ms: i64, attempts: i32) -> Duration {
    let base = base_ms.max(0) as u64;
    let exponent = (attempts.max(1) - 1).min(MAX_BACKOFF_EXPONENT as i32) as u32;
    Duration::from_millis(base.saturating_mul(1u64 << exponent))
}

pub async fn enqueue(
    pool: &Pool<Postgres>,
    queue: &str,
    job_type: &str,
    payload: &Value,
    options: JobOptions,
) -> Result<String> {
    let job_id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO jobs \
         (job_id, queue, job_type, payload, status, max_attempts, backoff_base_ms) \
         VALUES ($1, $2, $3, $4, 'pending', $5, $6)",
    )
    .bind(&job_id)
    .bind(queue)
    .bind(job_type)
    .bind(payload)
    .bind(options.max_attempts.max(1))
    .bind(options.backoff_base.as_millis() as i64)
    .execute(pool)
    .await?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(JOBS_CHANNEL)
        .bind(queue)
        .execute(pool)
        .await?;

    metrics::inc_jobs_enqueued(queue);
    tracing::debug!(%job_id, queue, job_type, "job enqueued");
    Ok(job_id)
}

pub async fn claim(pool: &Pool<Postgres>, queues: &[&str]) -> Result<Option<Job>> {
    let queues: Vec<String> = queues.iter().map(|queue| queue.to_string()).collect();
    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "SELECT job_id, queue, job_type, payload, attempts, max_attempts, backoff_base_ms \
         FROM jobs \
         WHERE status = 'pending' \
           AND queue = ANY($1) \
           AND next_run_at <= NOW() \
         ORDER BY next_run_at ASC, created_at ASC \
         LIMIT 1 \
         FOR UPDATE SKIP LOCKED",
    )
    .bind(&queues)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.commit().await?;
        return Ok(None);
    };

    let job_id: String = row.try_get("job_id")?;
    let attempts: i32 = row.try_get("attempts")?;

    sqlx::query(
        "UPDATE jobs \
         SET status = 'running', attempts = $1, started_at = NOW(), updated_at = NOW() \
         WHERE job_id = $2",
    )
    .bind(attempts + 1)
    .bind(&job_id)
    .execute(&mut *tx)
    .await?;

    let job = Job {
        job_id,
        queue: row.try_get("queue")?,
        job_type: row.try_get("job_type")?,
        payload: row.try_get("payload")?,
        attempts: attempts + 1,
        max_attempts: row.try_get("max_attempts")?,
        backoff_base_ms: row.try_get("backoff_base_ms")?,
    };
    tx.commit().await?;
    Ok(Some(job))
}

pub async fn finalize(
    pool: &Pool<Postgres>,
    job: &Job,
    result: Result<(), String>,
) -> Result<JobOutcome> {
    match result {
        Ok(()) => {
            sqlx::query(
                "UPDATE jobs \
                 SET status = 'succeeded', completed_at = NOW(), updated_at = NOW(), last_error = NULL \
                 WHERE job_id = $1",
            )
            .bind(&job.job_id)
            .execute(pool)
            .await?;
            Ok(JobOutcome::Succeeded)
        }
        Err(err) if job.is_final_attempt() => {
            sqlx::query(
                "UPDATE jobs \
                 SET status = 'failed', completed_at = NOW(), updated_at = NOW(), last_error = $1 \
                 WHERE job_id = $2",
            )
            .bind(&err)
            .bind(&job.job_id)
            .execute(pool)
            .await?;
            Ok(JobOutcome::Failed)
        }
        Err(err) => {
            let delay = backoff_delay(job.backoff_base_ms, job.attempts);
            sqlx::query(
                "UPDATE jobs \
                 SET status = 'pending', next_run_at = NOW() + ($1 * INTERVAL '1 millisecond'), \
                     updated_at = NOW(), last_error = $2 \
                 WHERE job_id = $3",
            )
            .bind(delay.as_millis() as i64)
            .bind(&err)
            .bind(&job.job_id)
            .execute(pool)
            .await?;
            Ok(JobOutcome::Retrying(delay))
        }
    }
}

/// Deletes finished jobs beyond the newest `keep_*` rows of each status.
pub async fn prune(pool: &Pool<Postgres>, queue: &str, policy: RetentionPolicy) -> Result<u64> {
    let mut deleted = 0;
    for (status, keep) in [
        ("succeeded", policy.keep_completed),
        ("failed", policy.keep_failed),
    ] {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE job_id IN ( \
                 SELECT job_id FROM jobs \
                 WHERE queue = $1 AND status = $2 \
                 ORDER BY completed_at DESC NULLS LAST, created_at DESC \
                 OFFSET $3)",
        )
        .bind(queue)
        .bind(status)
        .bind(keep.max(0))
        .execute(pool)
        .await?;
        deleted += result.rows_affected();
    }
    Ok(deleted)
}

/// Returns jobs stuck in `running` (a worker died mid-job) to `pending`.
pub async fn recover_stale(pool: &Pool<Postgres>, stale_after: Duration) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE jobs \
         SET status = 'pending', next_run_at = NOW(), updated_at = NOW() \
         WHERE status = 'running' \
           AND started_at < NOW() - ($1 * INTERVAL '1 second')",
    )
    .bind(stale_after.as_secs() as i64)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
