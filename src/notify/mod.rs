mod message;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::differ::DiffResult;
use crate::error::NotifyError;

pub use message::{compose, test_message, NotificationMessage};
pub use smtp::{SmtpMailer, SmtpSettings};

/// Delivers a finished message. SMTP in production, a recorder in tests.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Diff was empty, nothing sent
    Skipped,
    Sent,
}

/// Turns diffs into mail for the configured source
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    source_url: String,
}

impl Notifier {
    pub fn new(transport: Arc<dyn MailTransport>, source_url: impl Into<String>) -> Self {
        Self {
            transport,
            source_url: source_url.into(),
        }
    }

    pub async fn notify(
        &self,
        diff: &DiffResult,
        recipient: &str,
    ) -> Result<NotifyOutcome, NotifyError> {
        if diff.is_empty() {
            info!("no changes to report, skipping notification");
            return Ok(NotifyOutcome::Skipped);
        }

        let message = compose(diff, recipient, &self.source_url);
        self.transport.send(&message).await?;
        info!(recipient, subject = %message.subject, "notification sent");
        Ok(NotifyOutcome::Sent)
    }

    /// Send a fixed message to check the mail settings end to end.
    pub async fn send_test(&self, recipient: &str) -> Result<(), NotifyError> {
        let message = test_message(recipient, &self.source_url);
        self.transport.send(&message).await?;
        info!(recipient, "test notification sent");
        Ok(())
    }
}
