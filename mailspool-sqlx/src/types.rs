use chrono::{DateTime, Utc};
use mailspool::job::EmailJob;
use sqlx::prelude::FromRow;

#[derive(sqlx::Type, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "mailspool_job_state", rename_all = "lowercase")]
pub(crate) enum JobStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl From<JobStatus> for mailspool::JobStatus {
    fn from(value: JobStatus) -> Self {
        match value {
            JobStatus::Pending => Self::Pending,
            JobStatus::Processing => Self::Processing,
            JobStatus::Sent => Self::Sent,
            JobStatus::Failed => Self::Failed,
        }
    }
}

impl From<mailspool::JobStatus> for JobStatus {
    fn from(value: mailspool::JobStatus) -> Self {
        match value {
            mailspool::JobStatus::Pending => Self::Pending,
            mailspool::JobStatus::Processing => Self::Processing,
            mailspool::JobStatus::Sent => Self::Sent,
            mailspool::JobStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: i64,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRow> for EmailJob {
    fn from(value: JobRow) -> Self {
        Self {
            id: value.id.into(),
            recipient: value.recipient,
            subject: value.subject,
            content: value.content,
            status: value.status.into(),
            attempts: value.attempts,
            last_error: value.last_error,
            next_attempt_at: value.next_attempt_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}
