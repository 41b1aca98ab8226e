use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheResult, KvCache};

/// Process-local cache with the same expiry semantics as Redis `SET EX`.
/// Uses tokio's clock so tests can pause and advance time.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs.max(1));
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            None => return Ok(None),
            Some((value, deadline)) if *deadline > Instant::now() => {
                return Ok(Some(value.clone()))
            }
            Some(_) => {}
        }
        entries.remove(key);
        Ok(None)
    }

    async fn del(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> CacheResult<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let current = match entries.get(key) {
            Some((value, deadline)) if *deadline > now => value.parse::<i64>().unwrap_or(0),
            _ => 0,
        };
        let next = current + 1;
        let deadline = now + Duration::from_secs(ttl_secs.max(1));
        entries.insert(key.to_string(), (next.to_string(), deadline));
        Ok(next)
    }

    async fn reconnect(&self) -> CacheResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let cache = MemoryCache::new();
        cache.set("reset:a@x.com", "1234", 600).await.unwrap();
        assert_eq!(
            cache.get("reset:a@x.com").await.unwrap().as_deref(),
            Some("1234")
        );
        cache.del("reset:a@x.com").await.unwrap();
        assert_eq!(cache.get("reset:a@x.com").await.unwrap(), None);
        // absent key
        cache.del("reset:a@x.com").await.unwrap();
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let cache = MemoryCache::new();
        cache.set("k", "old", 60).await.unwrap();
        cache.set("k", "new", 60).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn counters_increment_and_expire() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("verifyAttempts:a@x.com", 600).await.unwrap(), 1);
        assert_eq!(cache.incr("verifyAttempts:a@x.com", 600).await.unwrap(), 2);
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(cache.incr("verifyAttempts:a@x.com", 600).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = MemoryCache::new();
        cache.set("verify:a@x.com", "{}", 600).await.unwrap();
        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(cache.get("verify:a@x.com").await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("verify:a@x.com").await.unwrap().is_none());
    }
}
