//! The boundary to the external send capability.
//!
//! The queue treats delivery as a black box: one call per recipient chunk,
//! with a boolean outcome and an optional list of individually rejected
//! addresses. Transport details (SMTP, an HTTP provider, a console logger in
//! development) live entirely behind [`Mailer`].

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of one provider call for a single recipient chunk.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub success: bool,
    /// Provider error text, set when `success` is false.
    pub error: Option<String>,
    /// Addresses the provider rejected individually. Reported independently
    /// of `success`: a send can succeed as a whole while still bouncing
    /// specific recipients.
    pub rejected: Vec<String>,
}

impl Delivery {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
            rejected: Vec::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            rejected: Vec::new(),
        }
    }

    pub fn with_rejected(self, rejected: Vec<impl Into<String>>) -> Self {
        Self {
            rejected: rejected.into_iter().map(Into::into).collect(),
            ..self
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MailerError {
    #[error("mail provider error: {0}")]
    Provider(String),
    #[error("mail transport unavailable: {0}")]
    Transport(String),
}

/// Sends one message to a batch of recipients.
///
/// An `Err` is handled by the processor exactly like a [`Delivery`] with
/// `success = false` and the error's display text as the reason.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        content: &str,
    ) -> Result<Delivery, MailerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_the_provider_text() {
        let delivery = Delivery::failure("mailbox quota exceeded");
        assert!(!delivery.success);
        assert_eq!(delivery.error.as_deref(), Some("mailbox quota exceeded"));
        assert!(delivery.rejected.is_empty());
    }

    #[test]
    fn rejected_addresses_are_independent_of_the_outcome() {
        let delivery = Delivery::success().with_rejected(vec!["broken@"]);
        assert!(delivery.success);
        assert_eq!(delivery.rejected, vec!["broken@".to_owned()]);
    }
}
