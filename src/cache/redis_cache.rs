use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::{CacheError, CacheResult, KvCache};

/// Shared Redis connection manager guarded by a Tokio mutex.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

/// Redis-backed cache. One connection manager is shared by the whole process;
/// `reconnect` swaps it out when a ping fails.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
    manager: SharedConnectionManager,
    timeout: Duration,
}

impl RedisCache {
    pub async fn connect(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::open(url).context("failed to parse REDIS_URL connection string")?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .context("failed to initialize Redis connection manager")?;
        info!("connected to redis");
        Ok(Self {
            client,
            manager: Arc::new(Mutex::new(manager)),
            timeout,
        })
    }

    async fn conn(&self) -> ConnectionManager {
        self.manager.lock().await.clone()
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        bounded(self.timeout, op, fut).await
    }
}

/// Runs a Redis command under `timeout`, logging failures before returning them.
pub(crate) async fn bounded<T, F>(timeout: Duration, op: &'static str, fut: F) -> CacheResult<T>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => {
            error!(op, error = %e, "redis command failed");
            Err(CacheError::Backend(e.to_string()))
        }
        Err(_) => {
            error!(op, timeout_ms = timeout.as_millis() as u64, "redis command timed out");
            Err(CacheError::Timeout(timeout))
        }
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn().await;
        // EX 0 is rejected by redis
        let ttl = ttl_secs.max(1);
        self.bounded("SET", async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await;
        self.bounded("GET", async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<_, Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn().await;
        self.bounded("DEL", async move {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> CacheResult<i64> {
        let mut conn = self.conn().await;
        let ttl = ttl_secs.max(1);
        let (count,): (i64,) = self
            .bounded("INCR", async move {
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl)
                    .ignore()
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(count)
    }

    async fn reconnect(&self) -> CacheResult<()> {
        let mut conn = self.conn().await;
        let alive = tokio::time::timeout(self.timeout, async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await;
        if matches!(alive, Ok(Ok(_))) {
            return Ok(());
        }

        warn!("redis ping failed; rebuilding connection");
        let client = self.client.clone();
        let fresh = self
            .bounded("RECONNECT", async move { ConnectionManager::new(client).await })
            .await?;
        *self.manager.lock().await = fresh;
        info!("redis connection rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::{ErrorKind, RedisError};

    #[tokio::test(start_paused = true)]
    async fn stalled_command_maps_to_timeout() {
        let limit = Duration::from_millis(250);
        let res: CacheResult<()> = bounded(limit, "GET", std::future::pending()).await;
        match res {
            Err(CacheError::Timeout(d)) => assert_eq!(d, limit),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn command_error_maps_to_backend() {
        let res: CacheResult<()> = bounded(Duration::from_secs(1), "SET", async {
            Err(RedisError::from((ErrorKind::IoError, "connection reset")))
        })
        .await;
        match res {
            Err(CacheError::Backend(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_command_passes_through() {
        let res = bounded(Duration::from_secs(1), "GET", async {
            RedisResult::Ok(Some("v".to_string()))
        })
        .await
        .unwrap();
        assert_eq!(res.as_deref(), Some("v"));
    }
}
