use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::job::{EmailJob, JobId, NewJob};

pub mod memory;

/// Durable source of truth for delivery state.
///
/// Implementations must make [`JobStore::claim_ready`] atomic: a row moves
/// `pending -> processing` exactly once per claim even when several
/// processing passes overlap, and the terminal transitions
/// ([`JobStore::mark_sent`], [`JobStore::mark_failed`]) apply only to rows
/// currently `processing`, so a job can never reach two different terminal
/// states.
#[async_trait]
pub trait JobStore: Clone + Send + Sync {
    /// Bulk insert of pending jobs, one per recipient.
    async fn enqueue(&self, jobs: Vec<NewJob>) -> Result<Vec<JobId>, StoreError>;

    /// Atomically claims up to `limit` jobs with `status = pending` and
    /// `next_attempt_at <= now`, ordered by `(subject, content, created_at)`,
    /// marking them `processing` and bumping `attempts`.
    ///
    /// The ordering keeps grouping deterministic and debuggable; grouping
    /// itself is done by key, not by scan order.
    async fn claim_ready(&self, limit: usize) -> Result<Vec<EmailJob>, StoreError>;

    async fn mark_sent(&self, ids: &[JobId]) -> Result<(), StoreError>;

    async fn mark_failed(&self, ids: &[JobId], reason: &str) -> Result<(), StoreError>;

    /// Deletes sent jobs whose `updated_at` is older than `cutoff`.
    async fn delete_sent_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Releases `processing` jobs whose `updated_at` is older than `cutoff`
    /// back to `pending` with `next_attempt_at = now`.
    ///
    /// This is the lease-expiry recovery path for claims orphaned by a crash
    /// or timeout; the cutoff must exceed the longest plausible time to send
    /// one full content group.
    async fn release_stalled(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Earliest `next_attempt_at` among pending jobs, if any.
    async fn next_pending_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Live bucket counts for operator-facing views.
    async fn status_counts(&self) -> Result<StatusCounts, StoreError>;

    /// Manual operator retry: the listed `failed` jobs go back to `pending`
    /// with `last_error` cleared. Returns the number of rows affected.
    async fn resend(&self, ids: &[JobId]) -> Result<u64, StoreError>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store in bad state")]
    BadState,
    #[error("job store query failed: {0}")]
    Query(String),
}

/// Per-status job counts as seen by a polling UI.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
}
