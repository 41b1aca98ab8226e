use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::job::RenderedEmail;
use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("transport failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &RenderedEmail) -> Result<(), MailError>;
}

/// SMTP delivery through lettre.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| anyhow::anyhow!("Invalid SMTP_FROM address: {e}"))?;

        let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| anyhow::anyhow!("Failed to configure SMTP transport: {e}"))?
            .port(config.port);

        let builder = if let (Some(username), Some(password)) = (&config.username, &config.password)
        {
            builder.credentials(Credentials::new(username.to_string(), password.to_string()))
        } else {
            builder
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &RenderedEmail) -> Result<(), MailError> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.as_str())
            .header(header::ContentType::TEXT_PLAIN)
            .body(mail.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        info!(subject = %mail.subject, "email sent");
        Ok(())
    }
}

/// Logs instead of sending. Used when no SMTP host is configured.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &RenderedEmail) -> Result<(), MailError> {
        info!(
            to = %mail.to,
            subject = %mail.subject,
            "mailer in log-only mode; skipping actual send"
        );
        Ok(())
    }
}

pub fn build_mailer(config: &SmtpConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    if config.host.trim().is_empty() {
        warn!("SMTP host not configured; emails will only be logged");
        return Ok(Arc::new(LogMailer));
    }
    Ok(Arc::new(SmtpMailer::new(config)?))
}
