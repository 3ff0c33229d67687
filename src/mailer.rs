//! Mailer trait for account emails.
//!
//! Abstracts the delivery backend for password-reset mail. Rendering
//! rich templates is the host application's concern; this crate only
//! builds plain notification messages.

use crate::error::{QuarterdeckError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An email message to be sent.
#[derive(Debug, Clone)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Validate the email has the required fields.
    pub fn validate(&self) -> Result<()> {
        if self.from.is_empty() {
            return Err(QuarterdeckError::bad_request("Email 'from' is required"));
        }
        if self.to.is_empty() {
            return Err(QuarterdeckError::bad_request("Email 'to' is required"));
        }
        if self.subject.is_empty() {
            return Err(QuarterdeckError::bad_request("Email 'subject' is required"));
        }
        Ok(())
    }
}

/// Email delivery backend.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email.
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Mailer that logs messages instead of sending them. For development.
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        email.validate()?;
        tracing::info!(
            target: "accounts.mail",
            to = %email.to,
            subject = %email.subject,
            "email (console backend)"
        );
        Ok(())
    }
}

/// Mailer that records sent messages. For tests.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<RwLock<Vec<Email>>>,
}

impl RecordingMailer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub async fn sent(&self) -> Vec<Email> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        email.validate()?;
        self.sent.write().await.push(email.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_mailer_captures_messages() {
        let mailer = RecordingMailer::new();
        mailer
            .send(&Email::new(
                "noreply@example.com",
                "a@example.com",
                "Password reset",
                "body",
            ))
            .await
            .unwrap();

        let sent = mailer.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@example.com");
    }

    #[tokio::test]
    async fn test_validation_rejects_missing_recipient() {
        let mailer = RecordingMailer::new();
        let result = mailer
            .send(&Email::new("noreply@example.com", "", "subject", "body"))
            .await;
        assert!(result.is_err());
    }
}
