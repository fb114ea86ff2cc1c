//! Drives processing passes without any external trigger.
//!
//! The execution environment here is a persistent process, so instead of a
//! fire-and-forget self-invocation after every pass, a spawned loop re-arms
//! itself from the earliest pending eligibility time. The manual trigger
//! survives as [`SpoolerHandle::process_now`] and an external periodic caller
//! can remain as a backstop.

use std::time::Duration;

use chrono::Utc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{mailer::Mailer, processor::Processor, store::JobStore, MailspoolError};

/// Runs [`Processor::run`] on a loop: immediately after spawning, then again
/// whenever the re-arm delay elapses or a wake arrives.
pub struct Spooler<S, M>
where
    S: JobStore,
    M: Mailer,
{
    processor: Processor<S, M>,
}

impl<S, M> Spooler<S, M>
where
    S: JobStore + 'static,
    M: Mailer + 'static,
{
    pub fn new(processor: Processor<S, M>) -> Self {
        Self { processor }
    }

    pub fn spawn(self, cancellation_token: CancellationToken) -> SpoolerHandle {
        let (wake, mut wake_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn({
            let token = cancellation_token.clone();
            async move {
                loop {
                    match self.processor.run().await {
                        Ok(summary) => tracing::debug!(?summary, "Spooler pass complete"),
                        Err(error) => tracing::error!(?error, "Spooler pass failed: {error}"),
                    }
                    let delay = self.next_delay().await;
                    tokio::select! {
                        _ = wake_rx.recv() => {},
                        _ = tokio::time::sleep(delay) => {},
                        _ = token.cancelled() => {
                            tracing::debug!("Shutting down the mail spooler");
                            break;
                        },
                    }
                }
            }
        });
        SpoolerHandle {
            wake,
            handle: Some(handle),
            cancellation_token,
        }
    }

    /// Time until the next pass: backlog scheduled for the future re-arms at
    /// its eligibility time, clamped between the continuation delay and the
    /// idle poll interval; an empty queue sleeps the full idle interval.
    async fn next_delay(&self) -> Duration {
        let config = self.processor.config();
        match self.processor.store().next_pending_at().await {
            Ok(Some(at)) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .clamp(config.continuation_delay(), config.idle_delay()),
            Ok(None) => config.idle_delay(),
            Err(error) => {
                tracing::error!(?error, "Failed to read the next pending time: {error}");
                config.idle_delay()
            }
        }
    }
}

/// Handle to a running spooler loop.
pub struct SpoolerHandle {
    wake: mpsc::UnboundedSender<()>,
    handle: Option<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl SpoolerHandle {
    /// Manual "process now" trigger: wakes the loop for an immediate pass.
    ///
    /// Best-effort; a wake sent to a stopped spooler is simply dropped.
    pub fn process_now(&self) {
        let _ = self.wake.send(());
    }

    pub async fn graceful_shutdown(mut self) -> Result<(), MailspoolError> {
        self.cancellation_token.cancel();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|_| MailspoolError::GracefulShutdownFailed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeDelta;

    use super::*;
    use crate::{
        job::{builder::BroadcastBuilder, JobStatus},
        mailer::{Delivery, MailerError},
        processor::ProcessorConfig,
        store::memory::InMemoryStore,
    };

    #[derive(Clone)]
    struct AlwaysDelivers;

    #[async_trait]
    impl Mailer for AlwaysDelivers {
        async fn send(
            &self,
            _recipients: &[String],
            _subject: &str,
            _content: &str,
        ) -> Result<Delivery, MailerError> {
            Ok(Delivery::success())
        }
    }

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig::default()
            .with_chunk_delay(Duration::ZERO)
            .with_continuation_delay(Duration::from_millis(10))
            .with_idle_delay(Duration::from_millis(50))
    }

    async fn wait_until_drained(store: &InMemoryStore) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let jobs = store.all_jobs().unwrap();
                if !jobs.is_empty() && jobs.iter().all(|job| job.status.is_terminal()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("spooler did not drain the queue in time");
    }

    #[tokio::test]
    async fn the_spooler_drains_jobs_enqueued_after_spawning() {
        let store = InMemoryStore::new();
        let processor =
            Processor::new(store.clone(), AlwaysDelivers).with_config(fast_config());
        let handle = Spooler::new(processor).spawn(CancellationToken::new());

        BroadcastBuilder::default()
            .with_subject("Attendance warning")
            .add_recipient("truant@example.edu")
            .enqueue_to_store(&store)
            .await
            .unwrap();
        handle.process_now();

        wait_until_drained(&store).await;
        assert_eq!(store.all_jobs().unwrap()[0].status, JobStatus::Sent);
        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn future_backlog_is_picked_up_when_it_becomes_eligible() {
        let store = InMemoryStore::new();
        let processor =
            Processor::new(store.clone(), AlwaysDelivers).with_config(fast_config());
        BroadcastBuilder::default()
            .with_subject("Soon")
            .add_recipient("soon@example.edu")
            .schedule_in(TimeDelta::milliseconds(30))
            .enqueue_to_store(&store)
            .await
            .unwrap();

        let handle = Spooler::new(processor).spawn(CancellationToken::new());

        wait_until_drained(&store).await;
        assert_eq!(store.all_jobs().unwrap()[0].status, JobStatus::Sent);
        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let store = InMemoryStore::new();
        let processor =
            Processor::new(store.clone(), AlwaysDelivers).with_config(fast_config());
        let handle = Spooler::new(processor).spawn(CancellationToken::new());

        handle.graceful_shutdown().await.unwrap();

        // Nothing drains jobs enqueued after shutdown.
        BroadcastBuilder::default()
            .with_subject("Too late")
            .add_recipient("late@example.edu")
            .enqueue_to_store(&store)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.all_jobs().unwrap()[0].status, JobStatus::Pending);
    }
}
