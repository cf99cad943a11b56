//! The process-wide session backend handle.
//!
//! A [`SessionBackend`] bundles the long-lived collaborators (record store,
//! cache client, codec, key generator) and the session settings. Build it once
//! at startup and hand out request-scoped [`SessionLifecycle`]s from it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use tandem_core::config::{
    SessionConfig, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_CREATE_ATTEMPTS, MAX_AGE_LIMIT_SECS,
};
use tandem_core::{
    CacheBackendKind, CacheFormat, Config, JsonCodec, KeyGenerator, PayloadCodec,
    RandomKeyGenerator, SessionPayload, SessionRecord,
};

use crate::cache::{CacheClient, MemoryCache};
use crate::error::Result;
use crate::lifecycle::SessionLifecycle;
use crate::namespace;
use crate::store::{RecordStore, SqliteRecordStore};

/// Settings shared by every lifecycle built from one backend.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Session lifetime; durable expiry and cache TTL
    pub max_age: Duration,
    /// Cache key namespace
    pub key_prefix: String,
    /// Bound on the create-until-unique loop
    pub max_create_attempts: u32,
    /// What the cache mirror holds
    pub cache_format: CacheFormat,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            key_prefix: String::new(),
            max_create_attempts: DEFAULT_MAX_CREATE_ATTEMPTS,
            cache_format: CacheFormat::Encoded,
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_age: Duration::from_secs(config.max_age_secs),
            key_prefix: config.key_prefix.clone(),
            max_create_attempts: config.max_create_attempts,
            cache_format: config.cache_format,
        }
    }
}

impl SessionSettings {
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_max_create_attempts(mut self, attempts: u32) -> Self {
        self.max_create_attempts = attempts;
        self
    }

    pub fn with_cache_format(mut self, format: CacheFormat) -> Self {
        self.cache_format = format;
        self
    }

    /// Whole seconds of lifetime, capped at ten years.
    pub(crate) fn max_age_secs(&self) -> u64 {
        self.max_age.as_secs().min(MAX_AGE_LIMIT_SECS)
    }

    /// Session lifetime as a calendar duration.
    pub(crate) fn max_age_delta(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age_secs() as i64)
    }

    /// TTL for cache entries; matches the durable expiry.
    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.max_age_secs())
    }
}

/// Raw view of a durable record, for administration.
#[derive(Debug, Clone, Serialize)]
pub struct RecordInspection {
    pub record: SessionRecord,
    pub expired: bool,
    /// Decoded payload, if the data decodes
    pub payload: Option<SessionPayload>,
    /// Why decoding failed, if it did
    pub decode_error: Option<String>,
}

/// Builder for [`SessionBackend`].
pub struct SessionBackendBuilder {
    records: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheClient>,
    codec: Arc<dyn PayloadCodec>,
    keys: Arc<dyn KeyGenerator>,
    settings: SessionSettings,
}

impl SessionBackendBuilder {
    /// Payload codec (defaults to plain JSON).
    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Key generator (defaults to [`RandomKeyGenerator`]).
    pub fn key_generator(mut self, keys: Arc<dyn KeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> SessionBackend {
        SessionBackend {
            inner: Arc::new(BackendInner {
                records: self.records,
                cache: self.cache,
                codec: self.codec,
                keys: self.keys,
                settings: self.settings,
            }),
        }
    }
}

pub(crate) struct BackendInner {
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) cache: Arc<dyn CacheClient>,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    pub(crate) keys: Arc<dyn KeyGenerator>,
    pub(crate) settings: SessionSettings,
}

/// Shared handle to the session stores. Cheap to clone.
#[derive(Clone)]
pub struct SessionBackend {
    pub(crate) inner: Arc<BackendInner>,
}

impl SessionBackend {
    /// Start building a backend over the given stores.
    pub fn builder(
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheClient>,
    ) -> SessionBackendBuilder {
        SessionBackendBuilder {
            records,
            cache,
            codec: Arc::new(JsonCodec),
            keys: Arc::new(RandomKeyGenerator),
            settings: SessionSettings::default(),
        }
    }

    /// Open the stores named by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.ensure_valid()?;

        let path = config.store.resolved_path();
        let records = Arc::new(SqliteRecordStore::open(&path)?);
        info!(path = %path.display(), "Opened session record store");

        let cache: Arc<dyn CacheClient> = match config.cache.backend {
            CacheBackendKind::Memory => Arc::new(
                MemoryCache::new().with_legacy_commands(config.cache.legacy_commands),
            ),
            CacheBackendKind::Redis => Self::redis_cache(config).await?,
        };

        let codec: Arc<dyn PayloadCodec> = Arc::from(config.session.build_codec()?);

        Ok(Self::builder(records, cache)
            .codec(codec)
            .settings(SessionSettings::from(&config.session))
            .build())
    }

    #[cfg(feature = "redis")]
    async fn redis_cache(config: &Config) -> Result<Arc<dyn CacheClient>> {
        let url = config.cache.connection_url();
        let cache = crate::cache::RedisCache::connect(&url, config.cache.timeout())
            .await?
            .with_legacy_commands(config.cache.legacy_commands);
        Ok(Arc::new(cache))
    }

    #[cfg(not(feature = "redis"))]
    async fn redis_cache(_config: &Config) -> Result<Arc<dyn CacheClient>> {
        Err(tandem_core::Error::Config("tandem was built without the redis feature".into()).into())
    }

    /// A request-scoped lifecycle for `key` (or a keyless one).
    pub fn session(&self, key: Option<&str>) -> SessionLifecycle {
        SessionLifecycle::new(self.clone(), key)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.inner.records
    }

    pub fn cache(&self) -> &Arc<dyn CacheClient> {
        &self.inner.cache
    }

    /// Cache key for a session under this backend's prefix.
    pub fn physical_key(&self, session_key: &str) -> String {
        namespace::physical_key(session_key, &self.inner.settings.key_prefix)
    }

    /// Whether the key is taken by any durable record, expired or not.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.inner.records.exists(key).await?)
    }

    /// Read a durable record without touching lifecycle state.
    pub async fn inspect(&self, key: &str) -> Result<Option<RecordInspection>> {
        let Some(record) = self.inner.records.get(key).await? else {
            return Ok(None);
        };

        let expired = record.is_expired_at(Utc::now());
        let (payload, decode_error) = match self.inner.codec.decode(&record.data) {
            Ok(payload) => (Some(payload), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(Some(RecordInspection {
            record,
            expired,
            payload,
            decode_error,
        }))
    }

    /// Delete every expired durable record.
    ///
    /// Cache entries expire on their own TTL and are left alone.
    pub async fn clear_expired(&self) -> Result<usize> {
        let removed = self.inner.records.clear_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Cleared expired sessions");
        }
        Ok(removed)
    }

    /// Check that the cache backend answers.
    pub async fn ping_cache(&self) -> Result<()> {
        Ok(self.inner.cache.ping().await?)
    }
}
