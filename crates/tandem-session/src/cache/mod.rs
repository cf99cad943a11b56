//! Cache mirror clients.
//!
//! The cache holds a copy of each saved session under its namespaced key with
//! a native TTL. The lifecycle only ever writes to it; reads go through the
//! record store.

mod memory;
#[cfg(feature = "redis")]
mod redis_cache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

/// Errors raised by cache clients.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache did not answer within {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Volatile key/value storage with per-key TTL.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Whether [`CacheClient::set_with_ttl`] is available as a single call.
    ///
    /// Clients returning `false` are written with `set` followed by `expire`.
    fn supports_set_with_ttl(&self) -> bool {
        true
    }

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Store `value` under `key` without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set the TTL of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Remove `key`; a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
