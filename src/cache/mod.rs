//! Short-lived secret store.
//!
//! Everything written here carries an expiry: verification bundles, reset
//! codes, temporary passwords, OAuth state and the live session/refresh token
//! of each user.

mod memory;
mod redis_cache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryCache;
pub(crate) use self::redis_cache::bounded;
pub use self::redis_cache::RedisCache;

pub mod ttl {
    pub const VERIFICATION: u64 = 600;
    pub const RESET_CODE: u64 = 600;
    pub const TEMP_PASSWORD: u64 = 1800;
    pub const OAUTH_STATE: u64 = 600;
}

pub mod keys {
    use uuid::Uuid;

    pub fn verify(email: &str) -> String {
        format!("verify:{email}")
    }
    pub fn reset(email: &str) -> String {
        format!("reset:{email}")
    }
    pub fn temp_password(email: &str) -> String {
        format!("tempPassword:{email}")
    }
    pub fn session_token(user_id: Uuid) -> String {
        format!("sessionToken:{user_id}")
    }
    pub fn refresh_token(user_id: Uuid) -> String {
        format!("refreshToken:{user_id}")
    }
    pub fn oauth_state(state: &str) -> String {
        format!("oauthState:{state}")
    }
    pub fn reset_link(user_id: Uuid) -> String {
        format!("resetLink:{user_id}")
    }
    pub fn verify_attempts(email: &str) -> String {
        format!("verifyAttempts:{email}")
    }
    pub fn reset_attempts(email: &str) -> String {
        format!("resetAttempts:{email}")
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache command failed: {0}")]
    Backend(String),
    #[error("cache command timed out after {0:?}")]
    Timeout(Duration),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait KvCache: Send + Sync {
    /// Stores `value` under `key`, expiring after `ttl_secs`.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> CacheResult<()>;

    /// `None` when the key is missing or expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> CacheResult<()>;

    /// Increments the counter at `key` and (re)sets its expiry; returns the
    /// new value.
    async fn incr(&self, key: &str, ttl_secs: u64) -> CacheResult<i64>;

    /// No-op while the connection is healthy; otherwise rebuilds it.
    async fn reconnect(&self) -> CacheResult<()>;
}
