//! The purpose of this module is to alleviate the need to import many of the
//! `[mailspool]` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use mailspool::prelude::*;
//! ```
pub use crate::job::builder::BroadcastBuilder;
pub use crate::job::{EmailJob, JobId, JobStatus};
pub use crate::mailer::{Delivery, Mailer, MailerError};
pub use crate::processor::{Processor, ProcessorConfig, RunSummary};
pub use crate::spooler::{Spooler, SpoolerHandle};
pub use crate::store::{JobStore, StatusCounts, StoreError};
pub use crate::MailspoolError;
