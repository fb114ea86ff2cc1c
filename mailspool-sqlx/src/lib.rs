//! Postgres implementation of the mailspool [`JobStore`].
//!
//! Claiming is a single atomic statement (`UPDATE … WHERE id IN (SELECT …
//! FOR UPDATE SKIP LOCKED) RETURNING …`) so overlapping processing passes
//! can never both claim the same row, and the terminal updates are guarded
//! on `status = 'processing'` so a job reaches at most one terminal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailspool::{
    job::{EmailJob, JobId, NewJob},
    store::{JobStore, StatusCounts, StoreError},
};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::instrument;

mod types;

use types::{JobRow, JobStatus};

#[derive(Clone, Debug)]
pub struct PgJobStore {
    pool: PgPool,
}

impl From<PgPool> for PgJobStore {
    fn from(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<&PgPool> for PgJobStore {
    fn from(value: &PgPool) -> Self {
        Self {
            pool: value.to_owned(),
        }
    }
}

impl PgJobStore {
    /// Runs the embedded migrations, creating the jobs table and its state
    /// enum if needed.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Query(err.to_string()))
    }
}

fn store_error(err: sqlx::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

fn as_i64(ids: &[JobId]) -> Vec<i64> {
    ids.iter().copied().map(i64::from).collect()
}

fn insert_query(jobs: &[NewJob]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO mailspool_jobs (recipient, subject, content, next_attempt_at) ",
    );
    builder.push_values(jobs, |mut row, job| {
        row.push_bind(&job.recipient)
            .push_bind(&job.subject)
            .push_bind(&job.content)
            .push_bind(job.next_attempt_at);
    });
    builder.push(" RETURNING id");
    builder
}

const CLAIM_READY: &str = r#"UPDATE mailspool_jobs
SET
    status = 'processing',
    attempts = attempts + 1,
    updated_at = now()
WHERE id IN (
    SELECT id FROM mailspool_jobs
    WHERE status = 'pending'
    AND next_attempt_at <= now()
    ORDER BY subject, content, created_at
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
RETURNING
    id,
    recipient,
    subject,
    content,
    status,
    attempts,
    last_error,
    next_attempt_at,
    created_at,
    updated_at
"#;

const MARK_SENT: &str = r#"UPDATE mailspool_jobs
SET status = 'sent', updated_at = now()
WHERE id = ANY($1) AND status = 'processing'
"#;

const MARK_FAILED: &str = r#"UPDATE mailspool_jobs
SET status = 'failed', last_error = $2, updated_at = now()
WHERE id = ANY($1) AND status = 'processing'
"#;

const DELETE_SENT_BEFORE: &str = r#"DELETE FROM mailspool_jobs
WHERE status = 'sent' AND updated_at < $1
"#;

const RELEASE_STALLED: &str = r#"UPDATE mailspool_jobs
SET status = 'pending', next_attempt_at = now(), updated_at = now()
WHERE status = 'processing' AND updated_at < $1
"#;

const NEXT_PENDING_AT: &str = r#"SELECT min(next_attempt_at)
FROM mailspool_jobs
WHERE status = 'pending'
"#;

const STATUS_COUNTS: &str = r#"SELECT status, count(*)
FROM mailspool_jobs
GROUP BY status
"#;

const RESEND: &str = r#"UPDATE mailspool_jobs
SET status = 'pending', next_attempt_at = now(), last_error = NULL, updated_at = now()
WHERE id = ANY($1) AND status = 'failed'
"#;

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>, StoreError> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = insert_query(&jobs);
        let ids = query
            .build_query_scalar::<i64>()
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    #[instrument(skip(self))]
    async fn claim_ready(&self, limit: usize) -> Result<Vec<EmailJob>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(CLAIM_READY)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(rows.into_iter().map(EmailJob::from).collect())
    }

    async fn mark_sent(&self, ids: &[JobId]) -> Result<(), StoreError> {
        sqlx::query(MARK_SENT)
            .bind(as_i64(ids))
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn mark_failed(&self, ids: &[JobId], reason: &str) -> Result<(), StoreError> {
        sqlx::query(MARK_FAILED)
            .bind(as_i64(ids))
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(DELETE_SENT_BEFORE)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn release_stalled(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(RELEASE_STALLED)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn next_pending_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(NEXT_PENDING_AT)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(STATUS_COUNTS)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count as u64;
            match status {
                JobStatus::Pending => counts.pending = count,
                JobStatus::Processing => counts.processing = count,
                JobStatus::Sent => counts.sent = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    async fn resend(&self, ids: &[JobId]) -> Result<u64, StoreError> {
        let result = sqlx::query(RESEND)
            .bind(as_i64(ids))
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected())
    }
}
