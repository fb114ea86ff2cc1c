use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub mod builder;

/// Identifier of a single queued email, assigned by the store at enqueue.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub struct JobId(i64);

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<JobId> for i64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

/// Delivery state of a queued email.
///
/// Transitions are monotonic except for `Processing -> Pending` (stall
/// recovery) and the operator-initiated `Failed -> Pending` (manual resend).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }
}

/// One persisted (recipient, message) pair.
#[derive(Debug, Clone)]
pub struct EmailJob {
    pub id: JobId,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub status: JobStatus,
    /// Informational counter, incremented each time the job is claimed.
    pub attempts: i32,
    /// Failure reason, set only on [`JobStatus::Failed`].
    pub last_error: Option<String>,
    /// Earliest time the job becomes eligible for claiming.
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Drives both retention and stall recovery.
    pub updated_at: DateTime<Utc>,
}

impl EmailJob {
    pub(crate) fn content_key(&self) -> ContentKey {
        ContentKey {
            subject: self.subject.clone(),
            content: self.content.clone(),
        }
    }
}

/// A row ready for insertion by a producer.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub next_attempt_at: DateTime<Utc>,
}

/// Structural batching key: two jobs belong to the same broadcast exactly
/// when both fields match verbatim.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ContentKey {
    pub subject: String,
    pub content: String,
}
