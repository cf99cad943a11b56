//! Durable session record storage.
//!
//! The record store is the source of truth: a session exists if and only if
//! its row is present here with an expiry in the future. Every write runs
//! inside a savepoint so a rejected insert leaves nothing behind.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use tandem_core::{Config, SessionKey, SessionRecord};

/// Errors that can occur during record storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Session key already exists: {0}")]
    UniqueViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage path error: {0}")]
    PathError(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// How a record write treats an existing row with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Insert only; an existing key is a [`StoreError::UniqueViolation`].
    CreateOnly,
    /// Insert or replace payload and expiry.
    Upsert,
}

/// Durable record storage trait for abstraction over storage backends.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get a record by key, expired or not.
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>>;

    /// Get a record by key only if it expires after `now`.
    async fn get_live(&self, key: &str, now: DateTime<Utc>) -> Result<Option<SessionRecord>>;

    /// Whether any record holds this key, regardless of expiry.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Write a record.
    async fn save(&self, record: &SessionRecord, mode: WriteMode) -> Result<()>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every record expired at `now`. Returns the number removed.
    async fn clear_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

const INSERT_SQL: &str = r#"
    INSERT INTO sessions (session_key, session_data, expire_date)
    VALUES (?1, ?2, ?3)
"#;

const UPSERT_SQL: &str = r#"
    INSERT INTO sessions (session_key, session_data, expire_date)
    VALUES (?1, ?2, ?3)
    ON CONFLICT (session_key) DO UPDATE SET
        session_data = excluded.session_data,
        expire_date = excluded.expire_date
"#;

/// SQLite-backed record storage.
pub struct SqliteRecordStore {
    /// Database connection (wrapped in mutex for thread safety).
    conn: Mutex<Connection>,
    /// Database file, `None` for in-memory stores.
    path: Option<PathBuf>,
}

impl SqliteRecordStore {
    /// Create a store in `base_dir/sessions.db`.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        fs::create_dir_all(base_dir)?;
        Self::open(base_dir.join("sessions.db"))
    }

    /// Open (or create) the database at `path`.
    ///
    /// Creates the parent directory and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // Enable WAL mode for better concurrency
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open store at the default data directory.
    pub fn open_default() -> Result<Self> {
        let data_dir = Config::data_dir();
        if data_dir.starts_with("~") {
            return Err(StoreError::PathError("Could not find data directory".into()));
        }
        Self::new(data_dir)
    }

    /// Database file backing this store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            debug!("Applying session schema migration 1");
            let migration = include_str!("../migrations/001_initial.sql");
            conn.execute_batch(migration)?;
        }

        Ok(())
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    /// Unreadable timestamps count as already expired.
    fn from_millis(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
        Ok(SessionRecord {
            key: SessionKey::from(row.get::<_, String>(0)?),
            data: row.get(1)?,
            expire_date: Self::from_millis(row.get(2)?),
        })
    }

    fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT session_key, session_data, expire_date FROM sessions WHERE session_key = ?1",
                params![key],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn get_live(&self, key: &str, now: DateTime<Utc>) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                r#"
                SELECT session_key, session_data, expire_date FROM sessions
                WHERE session_key = ?1 AND expire_date > ?2
                "#,
                params![key, Self::to_millis(&now)],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let found: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sessions WHERE session_key = ?1)",
            params![key],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    async fn save(&self, record: &SessionRecord, mode: WriteMode) -> Result<()> {
        let mut conn = self.conn.lock();
        let sp = conn.savepoint()?;

        let sql = match mode {
            WriteMode::CreateOnly => INSERT_SQL,
            WriteMode::Upsert => UPSERT_SQL,
        };

        // An early return drops the savepoint, which rolls it back.
        sp.execute(
            sql,
            params![
                record.key.as_str(),
                record.data,
                Self::to_millis(&record.expire_date),
            ],
        )
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                StoreError::UniqueViolation(record.key.to_string())
            } else {
                StoreError::Database(e)
            }
        })?;

        sp.commit()?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM sessions WHERE session_key = ?1", params![key])?;
        Ok(rows > 0)
    }

    async fn clear_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM sessions WHERE expire_date <= ?1",
            params![Self::to_millis(&now)],
        )?;
        Ok(rows)
    }
}
