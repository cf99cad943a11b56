//! End-to-end lifecycle tests against SQLite records and the in-memory cache.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use tandem_core::{
    CacheFormat, KeyGenerator, PayloadCodec, RandomKeyGenerator, SessionKey, SessionPayload,
    SessionRecord, SignedCodec,
};
use tandem_session::cache::Result as CacheResult;
use tandem_session::{
    CacheClient, CacheError, MemoryCache, RecordStore, SessionBackend, SessionError,
    SessionSettings, SqliteRecordStore, WriteMode,
};

const SECRET: &str = "integration-test-secret-value";

/// Hands out a fixed list of keys, then random ones.
struct ScriptedKeys {
    queue: Mutex<VecDeque<String>>,
}

impl ScriptedKeys {
    fn new(keys: &[&str]) -> Self {
        Self {
            queue: Mutex::new(keys.iter().map(|k| k.to_string()).collect()),
        }
    }
}

impl KeyGenerator for ScriptedKeys {
    fn generate(&self) -> SessionKey {
        match self.queue.lock().pop_front() {
            Some(key) => SessionKey::from(key),
            None => RandomKeyGenerator.generate(),
        }
    }
}

/// Always returns the same key.
struct ConstantKey(&'static str);

impl KeyGenerator for ConstantKey {
    fn generate(&self) -> SessionKey {
        SessionKey::from(self.0.to_string())
    }
}

/// A cache whose every call fails.
struct BrokenCache;

#[async_trait]
impl CacheClient for BrokenCache {
    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

struct Harness {
    records: Arc<SqliteRecordStore>,
    cache: MemoryCache,
    backend: SessionBackend,
}

fn harness_with(settings: SessionSettings, cache: MemoryCache) -> Harness {
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let backend = SessionBackend::builder(records.clone(), Arc::new(cache.clone()))
        .settings(settings)
        .build();
    Harness {
        records,
        cache,
        backend,
    }
}

fn harness() -> Harness {
    harness_with(
        SessionSettings::default().with_key_prefix("test"),
        MemoryCache::new(),
    )
}

async fn saved_session(backend: &SessionBackend, payload: Value) -> String {
    let mut session = backend.session(None);
    let Value::Object(map) = payload else {
        panic!("payload must be an object");
    };
    session.update(map).await.unwrap();
    session.save(false).await.unwrap();
    session.key().unwrap().to_string()
}

fn object(value: Value) -> SessionPayload {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

#[tokio::test]
async fn test_saved_payload_round_trips() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"user": 42, "cart": ["a", "b"]})).await;

    let mut session = h.backend.session(Some(&key));
    let payload = session.payload().await.unwrap().clone();
    assert_eq!(payload, object(json!({"user": 42, "cart": ["a", "b"]})));
    assert_eq!(session.key().unwrap().as_str(), key);
    assert!(!session.is_modified());
}

#[tokio::test]
async fn test_load_after_delete_starts_new_session() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    h.backend.session(Some(&key)).delete(None).await.unwrap();

    let mut session = h.backend.session(Some(&key));
    assert!(session.load().await.unwrap().is_empty());
    let new_key = session.key().unwrap().as_str().to_string();
    assert_ne!(new_key, key);
    assert!(h.backend.exists(&new_key).await.unwrap());
    assert!(!h.backend.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_create_retries_past_taken_keys() {
    let taken = ["taken-key-0001", "taken-key-0002", "taken-key-0003"];
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    for key in taken {
        let record = SessionRecord::new(
            SessionKey::from(key.to_string()),
            r#"{"owner":"someone"}"#,
            chrono::Duration::hours(1),
        );
        records.save(&record, WriteMode::CreateOnly).await.unwrap();
    }

    let mut script = taken.to_vec();
    script.push("fresh-key-0004");
    let backend = SessionBackend::builder(records.clone(), Arc::new(MemoryCache::new()))
        .key_generator(Arc::new(ScriptedKeys::new(&script)))
        .build();

    let mut session = backend.session(None);
    session.create().await.unwrap();

    assert_eq!(session.key().unwrap().as_str(), "fresh-key-0004");
    assert!(session.is_modified());
    assert!(backend.exists("fresh-key-0004").await.unwrap());
    for key in taken {
        let record = records.get(key).await.unwrap().unwrap();
        assert_eq!(record.data, r#"{"owner":"someone"}"#);
    }
}

#[tokio::test]
async fn test_create_gives_up_after_max_attempts() {
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let record = SessionRecord::new(
        SessionKey::from("always-taken-key".to_string()),
        "{}",
        chrono::Duration::hours(1),
    );
    records.save(&record, WriteMode::CreateOnly).await.unwrap();

    let backend = SessionBackend::builder(records, Arc::new(MemoryCache::new()))
        .key_generator(Arc::new(ConstantKey("always-taken-key")))
        .settings(SessionSettings::default().with_max_create_attempts(3))
        .build();

    let err = backend.session(None).create().await.unwrap_err();
    assert!(matches!(err, SessionError::KeySpaceExhausted { attempts: 3 }));
}

#[tokio::test]
async fn test_save_sets_matching_expiry_and_ttl() {
    let h = harness_with(
        SessionSettings::default()
            .with_key_prefix("test")
            .with_max_age(Duration::from_secs(3600)),
        MemoryCache::new(),
    );
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    let record = h.records.get(&key).await.unwrap().unwrap();
    let remaining = record.remaining(Utc::now()).num_milliseconds();
    assert!((remaining - 3_600_000).abs() <= 1_000, "remaining {remaining}ms");

    let ttl = h.cache.ttl(&format!("test:{key}")).unwrap();
    assert!(ttl <= Duration::from_secs(3600) && ttl >= Duration::from_secs(3599));
}

#[tokio::test]
async fn test_double_delete_is_not_an_error() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    let session = h.backend.session(Some(&key));
    session.delete(None).await.unwrap();
    session.delete(None).await.unwrap();
    session.delete(Some("never-existed-key")).await.unwrap();

    assert!(!h.backend.exists(&key).await.unwrap());
    assert!(!h.cache.contains(&format!("test:{key}")));
}

#[tokio::test]
async fn test_delete_without_key_is_noop() {
    let h = harness();
    h.backend.session(None).delete(None).await.unwrap();
}

#[tokio::test]
async fn test_expired_record_loads_as_new_session() {
    let h = harness();
    let stale = SessionRecord {
        key: SessionKey::from("expired-key-0001".to_string()),
        data: r#"{"a":1}"#.to_string(),
        expire_date: Utc::now() - chrono::Duration::hours(1),
    };
    h.records.save(&stale, WriteMode::CreateOnly).await.unwrap();

    let mut session = h.backend.session(Some("expired-key-0001"));
    assert!(session.load().await.unwrap().is_empty());
    assert_ne!(session.key().unwrap().as_str(), "expired-key-0001");

    // exists ignores expiry
    assert!(h.backend.exists("expired-key-0001").await.unwrap());
}

#[tokio::test]
async fn test_sequential_saves_leave_latest_payload_in_both_stores() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    let mut session = h.backend.session(Some(&key));
    session.insert("a", 2).await.unwrap();
    session.save(false).await.unwrap();

    let record = h.records.get(&key).await.unwrap().unwrap();
    let cached = h.cache.get(&format!("test:{key}")).unwrap();
    assert_eq!(cached, record.data);
    let cached: Value = serde_json::from_str(&cached).unwrap();
    assert_eq!(cached, json!({"a": 2}));
}

#[tokio::test]
async fn test_legacy_cache_gets_set_then_expire() {
    let h = harness_with(
        SessionSettings::default().with_max_age(Duration::from_secs(600)),
        MemoryCache::new().with_legacy_commands(true),
    );
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    // No prefix configured: cache key is the session key
    let ttl = h.cache.ttl(&key).unwrap();
    assert!(ttl > Duration::from_secs(598));
}

#[tokio::test]
async fn test_cache_failure_does_not_fail_save() {
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let backend = SessionBackend::builder(records.clone(), Arc::new(BrokenCache)).build();

    let key = saved_session(&backend, json!({"a": 1})).await;
    assert!(records.get(&key).await.unwrap().is_some());

    let err = backend.session(Some(&key)).delete(None).await.unwrap_err();
    assert!(matches!(err, SessionError::Cache(_)));
    // The durable record goes first
    assert!(records.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_record_loads_as_new_session() {
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let codec: Arc<dyn PayloadCodec> = Arc::new(SignedCodec::new(SECRET).unwrap());
    let backend = SessionBackend::builder(records.clone(), Arc::new(MemoryCache::new()))
        .codec(codec)
        .build();

    let forged = SessionRecord::new(
        SessionKey::from("forged-key-0001".to_string()),
        r#"{"admin":true}"#,
        chrono::Duration::hours(1),
    );
    records.save(&forged, WriteMode::CreateOnly).await.unwrap();

    let mut session = backend.session(Some("forged-key-0001"));
    assert!(session.get("admin").await.unwrap().is_none());
    assert_ne!(session.key().unwrap().as_str(), "forged-key-0001");
}

#[tokio::test]
async fn test_signed_payload_round_trips() {
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let codec: Arc<dyn PayloadCodec> = Arc::new(SignedCodec::new(SECRET).unwrap());
    let backend = SessionBackend::builder(records.clone(), Arc::new(MemoryCache::new()))
        .codec(codec)
        .build();

    let key = saved_session(&backend, json!({"user": "ada"})).await;
    let record = records.get(&key).await.unwrap().unwrap();
    assert_ne!(record.data, r#"{"user":"ada"}"#);

    let mut session = backend.session(Some(&key));
    assert_eq!(session.get("user").await.unwrap(), Some(&json!("ada")));
}

#[tokio::test]
async fn test_json_cache_format_mirrors_plain_payload() {
    let records = Arc::new(SqliteRecordStore::in_memory().unwrap());
    let cache = MemoryCache::new();
    let codec: Arc<dyn PayloadCodec> = Arc::new(SignedCodec::new(SECRET).unwrap());
    let backend = SessionBackend::builder(records.clone(), Arc::new(cache.clone()))
        .codec(codec)
        .settings(SessionSettings::default().with_cache_format(CacheFormat::Json))
        .build();

    let key = saved_session(&backend, json!({"a": 1})).await;

    let cached: Value = serde_json::from_str(&cache.get(&key).unwrap()).unwrap();
    assert_eq!(cached, json!({"a": 1}));
    assert_ne!(records.get(&key).await.unwrap().unwrap().data, r#"{"a":1}"#);
}

#[tokio::test]
async fn test_must_create_on_existing_key_conflicts() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    let mut session = h.backend.session(Some(&key));
    let err = session.save(true).await.unwrap_err();
    assert!(matches!(err, SessionError::CreateConflict(k) if k == key));

    let record = h.records.get(&key).await.unwrap().unwrap();
    assert_eq!(record.data, r#"{"a":1}"#);
}

#[tokio::test]
async fn test_flush_removes_session_everywhere() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    let mut session = h.backend.session(Some(&key));
    session.flush().await.unwrap();

    assert!(session.key().is_none());
    assert!(session.is_empty());
    assert!(!h.backend.exists(&key).await.unwrap());
    assert!(!h.cache.contains(&format!("test:{key}")));

    session.insert("b", 2).await.unwrap();
    session.save(false).await.unwrap();
    assert_ne!(session.key().unwrap().as_str(), key);
}

#[tokio::test]
async fn test_cycle_key_moves_payload() {
    let h = harness();
    let key = saved_session(&h.backend, json!({"a": 1})).await;

    let mut session = h.backend.session(Some(&key));
    session.cycle_key().await.unwrap();
    let new_key = session.key().unwrap().as_str().to_string();

    assert_ne!(new_key, key);
    assert!(!h.backend.exists(&key).await.unwrap());
    assert!(!h.cache.contains(&format!("test:{key}")));

    let mut moved = h.backend.session(Some(&new_key));
    assert_eq!(moved.get("a").await.unwrap(), Some(&json!(1)));
}

#[tokio::test]
async fn test_on_disk_store_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let key = {
        let records = Arc::new(SqliteRecordStore::new(temp_dir.path()).unwrap());
        let backend = SessionBackend::builder(records, Arc::new(MemoryCache::new())).build();
        saved_session(&backend, json!({"persisted": true})).await
    };

    let records = Arc::new(SqliteRecordStore::new(temp_dir.path()).unwrap());
    let backend = SessionBackend::builder(records, Arc::new(MemoryCache::new())).build();
    let mut session = backend.session(Some(&key));
    assert_eq!(session.get("persisted").await.unwrap(), Some(&json!(true)));
}

#[tokio::test]
async fn test_clear_expired_keeps_live_sessions() {
    let h = harness();
    let live = saved_session(&h.backend, json!({"a": 1})).await;
    let stale = SessionRecord {
        key: SessionKey::from("expired-key-0002".to_string()),
        data: "{}".to_string(),
        expire_date: Utc::now() - chrono::Duration::minutes(5),
    };
    h.records.save(&stale, WriteMode::CreateOnly).await.unwrap();

    assert_eq!(h.backend.clear_expired().await.unwrap(), 1);
    assert!(h.backend.exists(&live).await.unwrap());
    assert!(!h.backend.exists("expired-key-0002").await.unwrap());
}
