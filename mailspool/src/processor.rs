//! One full processing pass over the ready backlog: sweep, recover, claim,
//! group, send in chunks, record outcomes.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use fxhash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::instrument;

use crate::{
    job::{ContentKey, EmailJob, JobId},
    mailer::{Delivery, Mailer},
    store::JobStore,
    MailspoolError,
};

/// Failure reason recorded when a chunk contains no usable address.
const NO_VALID_ADDRESSES: &str = "no valid email addresses";
/// Failure reason recorded for recipients the provider rejected individually.
const INVALID_EMAIL_FORMAT: &str = "invalid email format";

/// Tuning knobs for the processor and spooler.
///
/// The defaults are the production values: one hour of retention for sent
/// jobs, a ten minute stall lease, a 10,000 row claim window, 450 recipients
/// per provider call, and a 300ms inter-chunk throttle.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    retention: TimeDelta,
    stall_timeout: TimeDelta,
    claim_window: usize,
    chunk_cap: usize,
    chunk_delay: Duration,
    continuation_delay: Duration,
    idle_delay: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retention: TimeDelta::hours(1),
            stall_timeout: TimeDelta::minutes(10),
            claim_window: 10_000,
            chunk_cap: 450,
            chunk_delay: Duration::from_millis(300),
            continuation_delay: Duration::from_secs(1),
            idle_delay: Duration::from_secs(30),
        }
    }
}

impl ProcessorConfig {
    /// How long sent jobs are kept before the retention sweep deletes them.
    pub fn with_retention(self, retention: TimeDelta) -> Self {
        Self { retention, ..self }
    }

    /// How long a claim may sit unresolved before it is considered stalled.
    ///
    /// Too short risks re-sending a broadcast that is still legitimately in
    /// flight; too long delays recovery after a crash. The value must exceed
    /// the longest plausible time to send one full content group's chunks.
    pub fn with_stall_timeout(self, stall_timeout: TimeDelta) -> Self {
        Self {
            stall_timeout,
            ..self
        }
    }

    pub fn with_claim_window(self, claim_window: usize) -> Self {
        Self {
            claim_window,
            ..self
        }
    }

    /// Maximum recipients per provider call.
    pub fn with_chunk_cap(self, chunk_cap: usize) -> Self {
        Self { chunk_cap, ..self }
    }

    /// Delay between chunks of the same broadcast, to stay under provider
    /// rate limits.
    pub fn with_chunk_delay(self, chunk_delay: Duration) -> Self {
        Self {
            chunk_delay,
            ..self
        }
    }

    /// Minimum delay before the spooler re-runs when backlog remains.
    pub fn with_continuation_delay(self, continuation_delay: Duration) -> Self {
        Self {
            continuation_delay,
            ..self
        }
    }

    /// Poll interval of the spooler when the queue is empty.
    pub fn with_idle_delay(self, idle_delay: Duration) -> Self {
        Self { idle_delay, ..self }
    }

    pub(crate) fn continuation_delay(&self) -> Duration {
        self.continuation_delay
    }

    pub(crate) fn idle_delay(&self) -> Duration {
        self.idle_delay
    }
}

/// Counts reported to the triggering caller after one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub jobs_claimed: u64,
    pub jobs_sent: u64,
    pub jobs_failed: u64,
    pub chunks_sent: u64,
    pub recipients_reached: u64,
    pub sent_pruned: u64,
    pub stalled_released: u64,
}

impl RunSummary {
    /// JSON form of the summary, for callers that relay it over the wire.
    pub fn to_json(&self) -> Result<serde_json::Value, MailspoolError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Drains the ready backlog in content-grouped, provider-safe chunks.
pub struct Processor<S, M>
where
    S: JobStore,
    M: Mailer,
{
    store: S,
    mailer: M,
    config: ProcessorConfig,
}

impl<S, M> Processor<S, M>
where
    S: JobStore,
    M: Mailer,
{
    pub fn new(store: S, mailer: M) -> Self {
        Self {
            store,
            mailer,
            config: Default::default(),
        }
    }

    pub fn with_config(self, config: ProcessorConfig) -> Self {
        Self { config, ..self }
    }

    pub(crate) fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Runs one full pass: retention sweep, stall recovery, then repeated
    /// claim/group/send rounds until no eligible job remains.
    ///
    /// Only sweeper and claim failures surface as errors; everything inside
    /// the group and chunk loops is recovered locally so a single bad chunk
    /// never blocks the rest of the backlog.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RunSummary, MailspoolError> {
        let mut summary = RunSummary::default();
        let now = Utc::now();

        summary.sent_pruned = self
            .store
            .delete_sent_before(now - self.config.retention)
            .await?;
        if summary.sent_pruned > 0 {
            tracing::debug!(pruned = summary.sent_pruned, "Deleted sent jobs past retention");
        }

        summary.stalled_released = self
            .store
            .release_stalled(now - self.config.stall_timeout)
            .await?;
        if summary.stalled_released > 0 {
            tracing::warn!(
                released = summary.stalled_released,
                "Released stalled claims back to pending"
            );
        }

        loop {
            let window = self.store.claim_ready(self.config.claim_window).await?;
            if window.is_empty() {
                break;
            }
            summary.jobs_claimed += window.len() as u64;
            for group in partition(window) {
                self.send_group(group, &mut summary).await;
            }
        }

        tracing::debug!(?summary, "Processing pass complete");
        Ok(summary)
    }

    async fn send_group(&self, group: ContentGroup, summary: &mut RunSummary) {
        let chunks = group.jobs.chunks(self.config.chunk_cap).collect::<Vec<_>>();
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.send_chunk(&group.key, chunk, summary).await;
            // Throttle between chunks of the same broadcast, never after the
            // last one.
            if index < last {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
        }
    }

    async fn send_chunk(&self, key: &ContentKey, chunk: &[EmailJob], summary: &mut RunSummary) {
        let addresses = chunk
            .iter()
            .filter(|job| !job.recipient.trim().is_empty())
            .map(|job| job.recipient.clone())
            .collect::<Vec<_>>();

        if addresses.is_empty() {
            let ids = chunk.iter().map(|job| job.id).collect::<Vec<_>>();
            self.record_failed(&ids, NO_VALID_ADDRESSES, summary).await;
            return;
        }

        let delivery = match self
            .mailer
            .send(&addresses, &key.subject, &key.content)
            .await
        {
            Ok(delivery) => delivery,
            Err(error) => Delivery::failure(error.to_string()),
        };

        let rejected = delivery
            .rejected
            .iter()
            .map(String::as_str)
            .collect::<FxHashSet<_>>();
        let mut rejected_ids = Vec::new();
        let mut remaining = Vec::new();
        for job in chunk {
            if rejected.contains(job.recipient.as_str()) {
                rejected_ids.push(job.id);
            } else {
                remaining.push(job.id);
            }
        }

        // Individually rejected recipients are a finer-grained failure
        // channel than the batch outcome and are recorded first either way.
        self.record_failed(&rejected_ids, INVALID_EMAIL_FORMAT, summary)
            .await;

        if delivery.success {
            let reached = addresses
                .iter()
                .filter(|address| !rejected.contains(address.as_str()))
                .count();
            summary.chunks_sent += 1;
            summary.recipients_reached += reached as u64;
            self.record_sent(&remaining, summary).await;
        } else {
            let reason = delivery.error.as_deref().unwrap_or("send failed");
            tracing::error!(
                jobs = remaining.len(),
                subject = %key.subject,
                "Chunk delivery failed: {reason}"
            );
            self.record_failed(&remaining, reason, summary).await;
        }
    }

    async fn record_sent(&self, ids: &[JobId], summary: &mut RunSummary) {
        if ids.is_empty() {
            return;
        }
        match self.store.mark_sent(ids).await {
            Ok(()) => summary.jobs_sent += ids.len() as u64,
            Err(err) => tracing::error!(
                ?err,
                jobs = ids.len(),
                "Failed to record sent jobs, leaving them for stall recovery: {err}"
            ),
        }
    }

    async fn record_failed(&self, ids: &[JobId], reason: &str, summary: &mut RunSummary) {
        if ids.is_empty() {
            return;
        }
        match self.store.mark_failed(ids, reason).await {
            Ok(()) => summary.jobs_failed += ids.len() as u64,
            Err(err) => tracing::error!(
                ?err,
                jobs = ids.len(),
                "Failed to record failed jobs, leaving them for stall recovery: {err}"
            ),
        }
    }
}

/// One broadcast: the jobs of a claimed window sharing identical subject and
/// content. Exists only for the duration of a pass.
struct ContentGroup {
    key: ContentKey,
    jobs: Vec<EmailJob>,
}

fn partition(window: Vec<EmailJob>) -> Vec<ContentGroup> {
    let mut groups: FxHashMap<ContentKey, Vec<EmailJob>> = FxHashMap::default();
    for job in window {
        let key = job.content_key();
        groups.entry(key).or_default().push(job);
    }
    groups
        .into_iter()
        .map(|(key, jobs)| ContentGroup { key, jobs })
        .collect()
}
