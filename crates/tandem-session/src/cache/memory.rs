use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CacheClient, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    deadline: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

/// Process-local cache with per-key deadlines.
///
/// Expired entries are invisible to readers and dropped on the next write
/// access. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    legacy_commands: bool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise no single-call set-with-TTL, forcing the two-call path.
    pub fn with_legacy_commands(mut self, legacy: bool) -> Self {
        self.legacy_commands = legacy;
        self
    }

    /// Current value of `key`, if present and unexpired.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let inner = self.inner.read();
        inner
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Remaining TTL of `key`; `None` if missing, expired or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.read();
        inner
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.deadline)
            .map(|d| d.saturating_duration_since(now))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner.read().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(map: &mut HashMap<String, Entry>, now: Instant) {
        map.retain(|_, e| !e.is_expired(now));
    }
}

#[async_trait]
impl CacheClient for MemoryCache {
    fn supports_set_with_ttl(&self) -> bool {
        !self.legacy_commands
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        Self::purge_expired(&mut inner, now);
        inner.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        Self::purge_expired(&mut inner, now);
        inner.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                deadline: None,
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut inner = self.inner.write();
        if let Some(entry) = inner.get_mut(key).filter(|e| !e.is_expired(now)) {
            entry.deadline = Some(now + ttl);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().remove(key);
        Ok(())
    }
}
