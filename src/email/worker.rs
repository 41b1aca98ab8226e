use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::mailer::Mailer;
use super::queue::{JobSource, Reserved};
use crate::config::EmailConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Retrying { attempt: u32, delay: Duration },
    DeadLettered,
}

/// Single consumer of the email queue.
#[derive(Clone)]
pub struct EmailWorker {
    source: Arc<dyn JobSource>,
    mailer: Arc<dyn Mailer>,
    max_attempts: u32,
    retry_base: Duration,
    poll: Duration,
}

impl EmailWorker {
    pub fn new(source: Arc<dyn JobSource>, mailer: Arc<dyn Mailer>, config: &EmailConfig) -> Self {
        Self {
            source,
            mailer,
            max_attempts: config.max_attempts.max(1),
            retry_base: Duration::from_millis(config.retry_base_ms),
            poll: Duration::from_secs(5),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// `base * 2^(attempt-1)`, attempt counted from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.retry_base.saturating_mul(1u32 << exp)
    }

    /// Consumes until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        match self.source.recover().await {
            Ok(n) if n > 0 => info!(count = n, "requeued stranded email jobs"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not recover in-flight email jobs"),
        }
        info!("email worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let reserved = tokio::select! {
                _ = shutdown.changed() => break,
                r = self.source.reserve(self.poll) => r,
            };
            match reserved {
                Ok(Some(reserved)) => {
                    self.process_one(reserved).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "email queue unavailable; backing off");
                    tokio::time::sleep(self.poll).await;
                }
            }
        }
        info!("email worker stopped");
    }

    /// Delivers one reserved job and settles it on the queue.
    #[instrument(skip(self, reserved), fields(job_id = %reserved.job.id, kind = reserved.job.kind()))]
    pub async fn process_one(&self, reserved: Reserved) -> Outcome {
        let mail = reserved.job.render();
        let err = match self.mailer.send(&mail).await {
            Ok(()) => {
                if let Err(e) = self.source.ack(&reserved).await {
                    warn!(error = %e, "sent email but failed to acknowledge job");
                }
                return Outcome::Sent;
            }
            Err(e) => e,
        };

        let mut next = reserved.job.clone();
        next.attempts += 1;
        if next.attempts >= self.max_attempts {
            error!(
                error = %err,
                attempts = next.attempts,
                email = %next.email,
                "email delivery failed permanently; dead-lettering"
            );
            if let Err(e) = self.source.bury(&reserved).await {
                error!(error = %e, "failed to dead-letter email job");
            }
            return Outcome::DeadLettered;
        }

        let delay = self.backoff(next.attempts);
        warn!(
            error = %err,
            attempt = next.attempts,
            delay_ms = delay.as_millis() as u64,
            "email delivery failed; retrying"
        );
        let source = self.source.clone();
        let attempt = next.attempts;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = source.requeue(&reserved, &next).await {
                error!(error = %e, job_id = %next.id, "failed to requeue email job");
            }
        });
        Outcome::Retrying { attempt, delay }
    }
}
