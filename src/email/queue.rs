use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::job::EmailJob;
use crate::cache::{bounded, CacheError};

pub const JOBS_KEY: &str = "email:jobs";
pub const PROCESSING_KEY: &str = "email:processing";
pub const DEAD_KEY: &str = "email:dead";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend failed: {0}")]
    Backend(String),
    #[error("queue command timed out after {0:?}")]
    Timeout(Duration),
    #[error("job could not be encoded: {0}")]
    Encode(String),
}

impl From<CacheError> for QueueError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Backend(msg) => QueueError::Backend(msg),
            CacheError::Timeout(d) => QueueError::Timeout(d),
        }
    }
}

/// Producer side. Returns once the queue has accepted the job.
#[async_trait]
pub trait EmailQueue: Send + Sync {
    async fn enqueue(&self, job: EmailJob) -> Result<(), QueueError>;
}

/// A job taken off the queue but not yet acknowledged. `raw` is the exact
/// stored payload, needed to remove it from the in-flight list.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub raw: String,
    pub job: EmailJob,
}

/// Consumer side, used by the worker.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Waits up to `wait` for a job and moves it to the in-flight list.
    async fn reserve(&self, wait: Duration) -> Result<Option<Reserved>, QueueError>;
    /// Delivery done; drop the job.
    async fn ack(&self, reserved: &Reserved) -> Result<(), QueueError>;
    /// Put `next` back on the queue in place of the in-flight job.
    async fn requeue(&self, reserved: &Reserved, next: &EmailJob) -> Result<(), QueueError>;
    /// Move the in-flight job to the dead-letter list.
    async fn bury(&self, reserved: &Reserved) -> Result<(), QueueError>;
    /// Return jobs stranded in flight by a previous worker to the queue.
    async fn recover(&self) -> Result<usize, QueueError>;
}

fn encode(job: &EmailJob) -> Result<String, QueueError> {
    serde_json::to_string(job).map_err(|e| QueueError::Encode(e.to_string()))
}

/// Durable queue on Redis lists. Producer and consumer sides hold separate
/// connections: a pending `BLMOVE` occupies its connection until it returns.
#[derive(Clone)]
pub struct RedisEmailQueue {
    producer: ConnectionManager,
    consumer: ConnectionManager,
    timeout: Duration,
}

impl RedisEmailQueue {
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::open(url).context("failed to parse REDIS_URL connection string")?;
        let producer = ConnectionManager::new(client.clone())
            .await
            .context("failed to initialize Redis producer connection for email queue")?;
        let consumer = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis consumer connection for email queue")?;
        Ok(Self {
            producer,
            consumer,
            timeout,
        })
    }

    async fn bury_raw(&self, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.consumer.clone();
        bounded(self.timeout, "BURY", async move {
            redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(PROCESSING_KEY)
                .arg(1)
                .arg(raw)
                .ignore()
                .cmd("LPUSH")
                .arg(DEAD_KEY)
                .arg(raw)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EmailQueue for RedisEmailQueue {
    async fn enqueue(&self, job: EmailJob) -> Result<(), QueueError> {
        let raw = encode(&job)?;
        let mut conn = self.producer.clone();
        bounded(self.timeout, "LPUSH", async move {
            redis::cmd("LPUSH")
                .arg(JOBS_KEY)
                .arg(&raw)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;
        info!(job_id = %job.id, kind = job.kind(), email = %job.email, "email job queued");
        Ok(())
    }
}

#[async_trait]
impl JobSource for RedisEmailQueue {
    async fn reserve(&self, wait: Duration) -> Result<Option<Reserved>, QueueError> {
        let mut conn = self.consumer.clone();
        let wait_secs = wait.as_secs().max(1);
        let raw: Option<String> = bounded(self.timeout + wait, "BLMOVE", async move {
            redis::cmd("BLMOVE")
                .arg(JOBS_KEY)
                .arg(PROCESSING_KEY)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(wait_secs)
                .query_async::<_, Option<String>>(&mut conn)
                .await
        })
        .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        match serde_json::from_str::<EmailJob>(&raw) {
            Ok(job) => Ok(Some(Reserved { raw, job })),
            Err(e) => {
                error!(error = %e, "undecodable email job; dead-lettering");
                self.bury_raw(&raw).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, reserved: &Reserved) -> Result<(), QueueError> {
        let mut conn = self.consumer.clone();
        let raw = reserved.raw.clone();
        bounded(self.timeout, "LREM", async move {
            redis::cmd("LREM")
                .arg(PROCESSING_KEY)
                .arg(1)
                .arg(&raw)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn requeue(&self, reserved: &Reserved, next: &EmailJob) -> Result<(), QueueError> {
        let next_raw = encode(next)?;
        let mut conn = self.consumer.clone();
        let raw = reserved.raw.clone();
        bounded(self.timeout, "REQUEUE", async move {
            redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(PROCESSING_KEY)
                .arg(1)
                .arg(&raw)
                .ignore()
                .cmd("LPUSH")
                .arg(JOBS_KEY)
                .arg(&next_raw)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn bury(&self, reserved: &Reserved) -> Result<(), QueueError> {
        self.bury_raw(&reserved.raw).await
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let mut moved = 0usize;
        loop {
            let mut conn = self.consumer.clone();
            let item: Option<String> = bounded(self.timeout, "LMOVE", async move {
                redis::cmd("LMOVE")
                    .arg(PROCESSING_KEY)
                    .arg(JOBS_KEY)
                    .arg("RIGHT")
                    .arg("RIGHT")
                    .query_async::<_, Option<String>>(&mut conn)
                    .await
            })
            .await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            warn!(count = moved, "recovered in-flight email jobs");
        }
        Ok(moved)
    }
}

/// In-process queue with the same contract, for tests and Redis-less runs.
#[derive(Default)]
pub struct MemoryEmailQueue {
    pending: Mutex<VecDeque<String>>,
    in_flight: Mutex<Vec<String>>,
    dead: Mutex<Vec<String>>,
    notify: Notify,
}

impl MemoryEmailQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pending_jobs(&self) -> Vec<EmailJob> {
        self.pending
            .lock()
            .await
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub async fn dead_letters(&self) -> Vec<EmailJob> {
        self.dead
            .lock()
            .await
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn take_in_flight(&self, raw: &str) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(pos) = in_flight.iter().position(|r| r == raw) {
            in_flight.remove(pos);
        }
    }

    async fn push(&self, raw: String) {
        self.pending.lock().await.push_back(raw);
        self.notify.notify_one();
    }
}

#[async_trait]
impl EmailQueue for MemoryEmailQueue {
    async fn enqueue(&self, job: EmailJob) -> Result<(), QueueError> {
        let raw = encode(&job)?;
        self.push(raw).await;
        debug!(job_id = %job.id, kind = job.kind(), "email job queued in memory");
        Ok(())
    }
}

#[async_trait]
impl JobSource for MemoryEmailQueue {
    async fn reserve(&self, wait: Duration) -> Result<Option<Reserved>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next = self.pending.lock().await.pop_front();
            if let Some(raw) = next {
                self.in_flight.lock().await.push(raw.clone());
                return match serde_json::from_str::<EmailJob>(&raw) {
                    Ok(job) => Ok(Some(Reserved { raw, job })),
                    Err(e) => {
                        error!(error = %e, "undecodable email job; dead-lettering");
                        self.take_in_flight(&raw).await;
                        self.dead.lock().await.push(raw);
                        Ok(None)
                    }
                };
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, reserved: &Reserved) -> Result<(), QueueError> {
        self.take_in_flight(&reserved.raw).await;
        Ok(())
    }

    async fn requeue(&self, reserved: &Reserved, next: &EmailJob) -> Result<(), QueueError> {
        let raw = encode(next)?;
        self.take_in_flight(&reserved.raw).await;
        self.push(raw).await;
        Ok(())
    }

    async fn bury(&self, reserved: &Reserved) -> Result<(), QueueError> {
        self.take_in_flight(&reserved.raw).await;
        self.dead.lock().await.push(reserved.raw.clone());
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let stranded: Vec<String> = self.in_flight.lock().await.drain(..).collect();
        let count = stranded.len();
        for raw in stranded {
            self.push(raw).await;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_is_fifo_and_tracks_in_flight() {
        let q = MemoryEmailQueue::new();
        q.enqueue(EmailJob::verification("a@x.com", "A", "1111"))
            .await
            .unwrap();
        q.enqueue(EmailJob::verification("b@x.com", "B", "2222"))
            .await
            .unwrap();

        let first = q.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.job.email, "a@x.com");
        assert_eq!(q.in_flight_len().await, 1);
        q.ack(&first).await.unwrap();
        assert_eq!(q.in_flight_len().await, 0);

        let second = q.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.job.email, "b@x.com");
        q.bury(&second).await.unwrap();
        assert_eq!(q.dead_letters().await.len(), 1);
        assert!(q.reserve(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recover_returns_stranded_jobs() {
        let q = MemoryEmailQueue::new();
        q.enqueue(EmailJob::temp_password("a@x.com", "A", "abcdef123456"))
            .await
            .unwrap();
        let _lost = q.reserve(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(q.recover().await.unwrap(), 1);
        assert_eq!(q.pending_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn reserve_wakes_on_enqueue() {
        let q = std::sync::Arc::new(MemoryEmailQueue::new());
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.reserve(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.enqueue(EmailJob::verification("a@x.com", "A", "1234"))
            .await
            .unwrap();
        let got = consumer.await.unwrap().unwrap();
        assert!(got.is_some());
    }
}
