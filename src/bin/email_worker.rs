//! Standalone consumer of the email queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bmitrack::{
    config::AppConfig,
    email::{build_mailer, EmailWorker, RedisEmailQueue},
    logging,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init("bmitrack=debug,email_worker=debug");

    let config = AppConfig::from_env()?;
    let timeout = Duration::from_millis(config.redis.command_timeout_ms);
    let queue = RedisEmailQueue::connect(&config.redis.url, timeout)
        .await
        .context("connect email queue")?;
    let mailer = build_mailer(&config.email.smtp)?;
    let worker = EmailWorker::new(Arc::new(queue), mailer, &config.email);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
