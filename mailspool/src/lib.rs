//! A durable, crash-recoverable delivery queue for transactional and
//! broadcast email.
//!
//! Producers insert one [`job::EmailJob`] row per recipient. The
//! [`processor::Processor`] drains the ready backlog in one pass: it sweeps
//! sent jobs past retention, releases stalled claims, then repeatedly claims
//! a window of due jobs, groups them by identical subject and content, and
//! delivers each group in provider-safe recipient chunks with an inter-chunk
//! throttle. The [`spooler::Spooler`] drives passes on a loop and re-arms
//! itself from the earliest scheduled job, with a manual
//! [`spooler::SpoolerHandle::process_now`] trigger.
//!
//! Delivery itself is behind the [`mailer::Mailer`] trait; the queue has no
//! knowledge of the transport.

pub mod job;
pub mod mailer;
pub mod processor;
pub mod spooler;
pub mod store;

pub mod prelude;

use thiserror::Error;

pub use job::{EmailJob, JobId, JobStatus};

#[derive(Debug, Error)]
pub enum MailspoolError {
    #[error("error communicating with the job store")]
    Store(#[from] store::StoreError),
    #[error("a broadcast needs at least one recipient")]
    EmptyBroadcast,
    #[error("failed to gracefully shut down")]
    GracefulShutdownFailed,
    #[error("error encoding or decoding value")]
    Encode(#[from] serde_json::Error),
}
