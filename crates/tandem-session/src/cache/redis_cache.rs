use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue, RedisResult};
use tracing::{debug, warn};

use super::{CacheClient, CacheError, Result};

/// Redis-backed cache mirror.
///
/// Commands go through one multiplexed [`ConnectionManager`], which
/// reconnects on its own after a dropped connection. Every round trip is
/// bounded by `timeout`; a stalled server surfaces as [`CacheError::Timeout`].
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    timeout: Duration,
    legacy_commands: bool,
}

impl RedisCache {
    /// Connect to the server at `url` (`redis://`, `rediss://` or `redis+unix://`).
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = bounded(timeout, client.get_connection_manager()).await?;
        debug!(timeout_ms = timeout.as_millis() as u64, "Connected to redis session cache");
        Ok(Self {
            conn,
            timeout,
            legacy_commands: false,
        })
    }

    /// Mirror with SET followed by EXPIRE, for servers without SETEX.
    pub fn with_legacy_commands(mut self, legacy: bool) -> Self {
        self.legacy_commands = legacy;
        self
    }

    async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T> {
        let mut conn = self.conn.clone();
        bounded(self.timeout, cmd.query_async::<T>(&mut conn)).await
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        // Redis rejects a zero TTL
        ttl.as_secs().max(1)
    }
}

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = RedisResult<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "Redis did not answer in time");
            Err(CacheError::Timeout(timeout))
        }
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    fn supports_set_with_ttl(&self) -> bool {
        !self.legacy_commands
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(key).arg(Self::ttl_secs(ttl)).arg(value);
        self.run::<()>(&cmd).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        self.run::<()>(&cmd).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(Self::ttl_secs(ttl));
        self.run::<i64>(&cmd).await.map(|_| ())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(key);
        self.run::<i64>(&cmd).await.map(|_| ())
    }

    async fn ping(&self) -> Result<()> {
        self.run::<String>(&redis::cmd("PING")).await.map(|_| ())
    }
}
