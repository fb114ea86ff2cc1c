//! Provides an in memory implementation of [`JobStore`].
//!
//! Currently this is provided for testing purposes and not designed for use
//! in a production system: it mirrors the transition guards of the Postgres
//! store so processor behavior can be exercised without a database.
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc, RwLock,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{JobStore, StatusCounts, StoreError};
use crate::job::{EmailJob, JobId, JobStatus, NewJob};

/// An in memory implementation of [`JobStore`].
///
/// **This is not designed for use in a production system.**
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<Vec<EmailJob>>>,
    id_counter: Arc<AtomicI64>,
}

impl InMemoryStore {
    /// Creates a new instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored job, for assertions in tests.
    pub fn all_jobs(&self) -> Result<Vec<EmailJob>, StoreError> {
        Ok(self.jobs.read().map_err(|_| StoreError::BadState)?.clone())
    }

    /// Rewrites a job's `updated_at`, to age rows in retention and stall
    /// recovery tests.
    pub fn set_updated_at(
        &self,
        id: JobId,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        if let Some(job) = jobs.iter_mut().find(|job| job.id == id) {
            job.updated_at = updated_at;
        }
        Ok(())
    }

    fn record_outcome(
        &self,
        ids: &[JobId],
        apply: impl Fn(&mut EmailJob),
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        for job in jobs.iter_mut() {
            // Terminal updates only ever apply to claimed rows.
            if job.status == JobStatus::Processing && ids.contains(&job.id) {
                apply(job);
                job.updated_at = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn enqueue(&self, new_jobs: Vec<NewJob>) -> Result<Vec<JobId>, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let mut ids = Vec::with_capacity(new_jobs.len());
        for new_job in new_jobs {
            let id = JobId::from(self.id_counter.fetch_add(1, Ordering::SeqCst));
            jobs.push(EmailJob {
                id,
                recipient: new_job.recipient,
                subject: new_job.subject,
                content: new_job.content,
                status: JobStatus::Pending,
                attempts: 0,
                last_error: None,
                next_attempt_at: new_job.next_attempt_at,
                created_at: now,
                updated_at: now,
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn claim_ready(&self, limit: usize) -> Result<Vec<EmailJob>, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let mut eligible = jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Pending && job.next_attempt_at <= now)
            .collect::<Vec<_>>();
        eligible.sort_by(|a, b| {
            a.subject
                .cmp(&b.subject)
                .then_with(|| a.content.cmp(&b.content))
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(eligible
            .into_iter()
            .take(limit)
            .map(|job| {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.updated_at = now;
                job.clone()
            })
            .collect())
    }

    async fn mark_sent(&self, ids: &[JobId]) -> Result<(), StoreError> {
        self.record_outcome(ids, |job| {
            job.status = JobStatus::Sent;
        })
    }

    async fn mark_failed(&self, ids: &[JobId], reason: &str) -> Result<(), StoreError> {
        self.record_outcome(ids, |job| {
            job.status = JobStatus::Failed;
            job.last_error = Some(reason.to_owned());
        })
    }

    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let before = jobs.len();
        jobs.retain(|job| !(job.status == JobStatus::Sent && job.updated_at < cutoff));
        Ok((before - jobs.len()) as u64)
    }

    async fn release_stalled(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let mut released = 0;
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                job.status = JobStatus::Pending;
                job.next_attempt_at = now;
                job.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn next_pending_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .jobs
            .read()
            .map_err(|_| StoreError::BadState)?
            .iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.next_attempt_at)
            .min())
    }

    async fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::BadState)?;
        let mut counts = StatusCounts::default();
        for job in jobs.iter() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Sent => counts.sent += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn resend(&self, ids: &[JobId]) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().map_err(|_| StoreError::BadState)?;
        let mut resent = 0;
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Failed && ids.contains(&job.id) {
                job.status = JobStatus::Pending;
                job.next_attempt_at = now;
                job.last_error = None;
                job.updated_at = now;
                resent += 1;
            }
        }
        Ok(resent)
    }
}
