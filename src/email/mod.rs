//! Outbound email: jobs, the durable queue, delivery and the consuming worker.

pub mod job;
pub mod mailer;
pub mod queue;
pub mod worker;

pub use job::{EmailJob, EmailPayload, RenderedEmail};
pub use mailer::{build_mailer, LogMailer, MailError, Mailer, SmtpMailer};
pub use queue::{EmailQueue, JobSource, MemoryEmailQueue, QueueError, RedisEmailQueue, Reserved};
pub use worker::{EmailWorker, Outcome};
