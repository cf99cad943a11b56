//! Request-scoped session lifecycle.
//!
//! A [`SessionLifecycle`] holds one session's key and lazily loaded payload.
//! The durable record store is authoritative; every successful save is
//! mirrored into the cache afterwards on a best-effort basis.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace, warn};

use tandem_core::{CacheFormat, SessionKey, SessionPayload, SessionRecord};

use crate::backend::SessionBackend;
use crate::error::{Result, SessionError};
use crate::store::{StoreError, WriteMode};

/// Outcome of reading the durable record for the current key.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Found(SessionPayload),
    /// Missing, expired or undecodable
    Absent,
}

/// One session as seen by one request.
pub struct SessionLifecycle {
    backend: SessionBackend,
    key: Option<SessionKey>,
    payload: Option<SessionPayload>,
    modified: bool,
    accessed: bool,
}

impl fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("key", &self.key)
            .field("loaded", &self.payload.is_some())
            .field("modified", &self.modified)
            .field("accessed", &self.accessed)
            .finish()
    }
}

impl SessionLifecycle {
    /// Keys shorter than the minimum length are dropped.
    pub(crate) fn new(backend: SessionBackend, key: Option<&str>) -> Self {
        Self {
            backend,
            key: key.and_then(SessionKey::parse),
            payload: None,
            modified: false,
            accessed: false,
        }
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn is_accessed(&self) -> bool {
        self.accessed
    }

    /// Read the durable record for the current key.
    pub async fn fetch(&self) -> Result<LoadOutcome> {
        let Some(key) = &self.key else {
            return Ok(LoadOutcome::Absent);
        };
        let inner = &self.backend.inner;

        let Some(record) = inner.records.get_live(key.as_str(), Utc::now()).await? else {
            debug!(key = %key, "No live session record");
            return Ok(LoadOutcome::Absent);
        };

        match inner.codec.decode(&record.data) {
            Ok(payload) => Ok(LoadOutcome::Found(payload)),
            Err(e) => {
                warn!(key = %key, error = %e, "Session data corrupted, starting a new session");
                Ok(LoadOutcome::Absent)
            }
        }
    }

    /// Read the payload from the stores, creating a fresh session if there is none.
    ///
    /// Always re-reads: unsaved edits held in memory are replaced by the
    /// stored copy. The accessors load lazily and never re-read, so callers
    /// that only read and write fields do not need this.
    pub async fn load(&mut self) -> Result<&SessionPayload> {
        let payload = match self.fetch().await? {
            LoadOutcome::Found(payload) => payload,
            LoadOutcome::Absent => {
                self.create().await?;
                SessionPayload::new()
            }
        };
        Ok(&*self.payload.insert(payload))
    }

    /// Start a new empty session under a freshly minted key.
    pub async fn create(&mut self) -> Result<()> {
        let key = self.mint(&SessionPayload::new()).await?;
        debug!(key = %key, "Created session");
        self.key = Some(key);
        self.payload = Some(SessionPayload::new());
        self.modified = true;
        Ok(())
    }

    /// Persist the payload to the record store, then mirror it into the cache.
    ///
    /// With `must_create` the durable write is insert-only and fails with
    /// [`SessionError::CreateConflict`] if the key is taken.
    pub async fn save(&mut self, must_create: bool) -> Result<()> {
        if !must_create {
            self.ensure_payload().await?;
        }

        let empty = SessionPayload::new();
        let payload = self.payload.as_ref().unwrap_or(&empty);

        if let Some(key) = &self.key {
            return self.persist(key, payload, must_create).await;
        }

        let key = self.mint(payload).await?;
        self.key = Some(key);
        Ok(())
    }

    /// Delete `key` (or the current key) from both stores.
    pub async fn delete(&self, key: Option<&str>) -> Result<()> {
        let target = match (key, &self.key) {
            (Some(key), _) => key,
            (None, Some(current)) => current.as_str(),
            (None, None) => return Ok(()),
        };
        let inner = &self.backend.inner;

        let removed = inner.records.delete(target).await?;
        inner.cache.delete(&self.backend.physical_key(target)).await?;
        debug!(key = target, removed, "Deleted session");
        Ok(())
    }

    /// Whether a durable record exists for `key`, expired or not.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.backend.exists(key).await
    }

    /// Drop the payload, delete the session from both stores and forget the key.
    pub async fn flush(&mut self) -> Result<()> {
        self.clear();
        self.delete(None).await?;
        self.key = None;
        Ok(())
    }

    /// Move the current payload to a new key and delete the old one.
    pub async fn cycle_key(&mut self) -> Result<()> {
        self.ensure_payload().await?;
        let old = self.key.clone();

        let empty = SessionPayload::new();
        let payload = self.payload.as_ref().unwrap_or(&empty);
        let key = self.mint(payload).await?;
        debug!(key = %key, "Cycled session key");

        self.key = Some(key);
        self.modified = true;
        if let Some(old) = old {
            self.delete(Some(old.as_str())).await?;
        }
        Ok(())
    }

    pub async fn get(&mut self, field: &str) -> Result<Option<&Value>> {
        self.accessed = true;
        Ok(self.ensure_payload().await?.get(field))
    }

    /// Set `field`, returning the previous value.
    pub async fn insert(
        &mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let (field, value) = (field.into(), value.into());
        self.touch();
        Ok(self.ensure_payload().await?.insert(field, value))
    }

    /// Remove `field`. Only counts as a modification if it was present.
    pub async fn remove(&mut self, field: &str) -> Result<Option<Value>> {
        self.accessed = true;
        let removed = self.ensure_payload().await?.remove(field);
        if removed.is_some() {
            self.modified = true;
        }
        Ok(removed)
    }

    pub async fn contains_key(&mut self, field: &str) -> Result<bool> {
        self.accessed = true;
        Ok(self.ensure_payload().await?.contains_key(field))
    }

    pub async fn keys(&mut self) -> Result<Vec<String>> {
        self.accessed = true;
        Ok(self.ensure_payload().await?.keys().cloned().collect())
    }

    /// Merge `values` into the payload.
    pub async fn update(&mut self, values: SessionPayload) -> Result<()> {
        self.touch();
        self.ensure_payload().await?.extend(values);
        Ok(())
    }

    pub async fn payload(&mut self) -> Result<&SessionPayload> {
        self.accessed = true;
        Ok(&*self.ensure_payload().await?)
    }

    /// Mutable payload access; marks the session modified.
    pub async fn payload_mut(&mut self) -> Result<&mut SessionPayload> {
        self.touch();
        self.ensure_payload().await
    }

    /// True when there is no key and nothing in the payload.
    pub fn is_empty(&self) -> bool {
        self.key.is_none() && self.payload.as_ref().map_or(true, |p| p.is_empty())
    }

    /// Empty the payload without touching the stores.
    pub fn clear(&mut self) {
        self.payload = Some(SessionPayload::new());
        self.touch();
    }

    /// Seconds until a session saved now expires.
    pub fn expiry_age(&self) -> u64 {
        self.backend.inner.settings.max_age_secs()
    }

    /// Expiry of a session saved now.
    pub fn expiry_date(&self) -> DateTime<Utc> {
        Utc::now() + self.backend.inner.settings.max_age_delta()
    }

    fn touch(&mut self) {
        self.accessed = true;
        self.modified = true;
    }

    async fn ensure_payload(&mut self) -> Result<&mut SessionPayload> {
        if self.payload.is_none() && self.key.is_some() {
            self.load().await?;
        }
        Ok(self.payload.get_or_insert_with(SessionPayload::new))
    }

    /// Insert `payload` under fresh keys until one is free.
    async fn mint(&self, payload: &SessionPayload) -> Result<SessionKey> {
        let inner = &self.backend.inner;
        let attempts = inner.settings.max_create_attempts;

        for attempt in 1..=attempts {
            let key = inner.keys.generate();
            match self.persist(&key, payload, true).await {
                Ok(()) => return Ok(key),
                Err(SessionError::CreateConflict(_)) => {
                    debug!(attempt, "Session key collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(attempts, "Gave up minting a session key");
        Err(SessionError::KeySpaceExhausted { attempts })
    }

    async fn persist(
        &self,
        key: &SessionKey,
        payload: &SessionPayload,
        must_create: bool,
    ) -> Result<()> {
        let inner = &self.backend.inner;
        let data = inner.codec.encode(payload)?;
        let record = SessionRecord::new(key.clone(), data, inner.settings.max_age_delta());

        let mode = if must_create {
            WriteMode::CreateOnly
        } else {
            WriteMode::Upsert
        };
        match inner.records.save(&record, mode).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(key)) if must_create => {
                return Err(SessionError::CreateConflict(key));
            }
            Err(e) => return Err(e.into()),
        }

        self.mirror(&record, payload).await;
        Ok(())
    }

    /// Copy a saved record into the cache. Failures are logged, never raised.
    async fn mirror(&self, record: &SessionRecord, payload: &SessionPayload) {
        let inner = &self.backend.inner;
        let cache_key = self.backend.physical_key(record.key.as_str());
        let ttl = inner.settings.cache_ttl();

        let value = match inner.settings.cache_format {
            CacheFormat::Encoded => Cow::Borrowed(record.data.as_str()),
            CacheFormat::Json => match serde_json::to_string(payload) {
                Ok(json) => Cow::Owned(json),
                Err(e) => {
                    warn!(key = %cache_key, error = %e, "Could not serialize cache entry");
                    return;
                }
            },
        };

        let result = if inner.cache.supports_set_with_ttl() {
            inner.cache.set_with_ttl(&cache_key, &value, ttl).await
        } else {
            match inner.cache.set(&cache_key, &value).await {
                Ok(()) => inner.cache.expire(&cache_key, ttl).await,
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(()) => trace!(key = %cache_key, ttl_secs = ttl.as_secs(), "Mirrored session to cache"),
            Err(e) => warn!(key = %cache_key, error = %e, "Cache write failed, durable record kept"),
        }
    }
}
