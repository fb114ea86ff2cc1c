use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    job::{JobId, NewJob},
    store::JobStore,
    MailspoolError,
};

/// Builder for enqueuing one notification to many recipients.
///
/// Inserts one row per recipient with the subject and content shared
/// verbatim, so the processor can batch the whole broadcast into
/// provider-safe chunks instead of N independent sends.
pub struct BroadcastBuilder {
    subject: String,
    content: String,
    recipients: Vec<String>,
    scheduled_at: DateTime<Utc>,
}

impl Default for BroadcastBuilder {
    fn default() -> Self {
        Self {
            subject: Default::default(),
            content: Default::default(),
            recipients: Default::default(),
            scheduled_at: Utc::now(),
        }
    }
}

impl BroadcastBuilder {
    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            ..self
        }
    }

    pub fn with_content(self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self
        }
    }

    pub fn add_recipient(self, recipient: impl Into<String>) -> Self {
        let mut recipients = self.recipients;
        recipients.push(recipient.into());
        Self { recipients, ..self }
    }

    pub fn with_recipients(self, recipients: Vec<impl Into<String>>) -> Self {
        let recipients = recipients.into_iter().map(Into::into).collect();
        Self { recipients, ..self }
    }

    pub fn schedule_at(self, schedule_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: schedule_at,
            ..self
        }
    }

    pub fn schedule_in(self, schedule_in: TimeDelta) -> Self {
        Self {
            scheduled_at: Utc::now() + schedule_in,
            ..self
        }
    }

    pub async fn enqueue_to_store<S: JobStore>(self, store: &S) -> Result<Vec<JobId>, MailspoolError> {
        if self.recipients.is_empty() {
            return Err(MailspoolError::EmptyBroadcast);
        }
        let jobs = self
            .recipients
            .into_iter()
            .map(|recipient| NewJob {
                recipient,
                subject: self.subject.clone(),
                content: self.content.clone(),
                next_attempt_at: self.scheduled_at,
            })
            .collect();
        Ok(store.enqueue(jobs).await?)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::{job::JobStatus, store::memory::InMemoryStore};

    #[tokio::test]
    async fn enqueue_inserts_one_pending_row_per_recipient() {
        let store = InMemoryStore::new();

        let ids = BroadcastBuilder::default()
            .with_subject("Fee reminder")
            .with_content("Your semester fee is due on Friday.")
            .with_recipients(vec!["alice@example.edu", "bob@example.edu"])
            .add_recipient("carol@example.edu")
            .enqueue_to_store(&store)
            .await
            .unwrap();

        assert_eq!(ids.len(), 3);
        let jobs = store.all_jobs().unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|job| job.status == JobStatus::Pending));
        assert!(jobs.iter().all(|job| job.subject == "Fee reminder"));
        assert!(jobs.iter().all(|job| job.next_attempt_at <= Utc::now()));
    }

    #[tokio::test]
    async fn scheduled_broadcast_is_not_yet_eligible() {
        let store = InMemoryStore::new();

        BroadcastBuilder::default()
            .with_subject("Seminar tomorrow")
            .with_content("Hall B, 10am.")
            .add_recipient("dave@example.edu")
            .schedule_in(TimeDelta::hours(2))
            .enqueue_to_store(&store)
            .await
            .unwrap();

        let claimed = store.claim_ready(100).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn broadcast_without_recipients_is_rejected() {
        let store = InMemoryStore::new();

        let result = BroadcastBuilder::default()
            .with_subject("Nobody home")
            .enqueue_to_store(&store)
            .await;

        assert_matches!(result, Err(MailspoolError::EmptyBroadcast));
    }
}
