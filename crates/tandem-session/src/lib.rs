//! # tandem-session
//!
//! Dual-store session persistence: a durable record store that is the source
//! of truth, mirrored into a TTL cache for fast reads by other consumers.
//!
//! This crate provides:
//! - The request-scoped [`SessionLifecycle`] (load, create, save, delete)
//! - The shared [`SessionBackend`] handle that owns the stores
//! - SQLite record storage with embedded migrations
//! - In-memory and Redis cache clients
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tandem_core::Config;
//! use tandem_session::SessionBackend;
//!
//! let backend = SessionBackend::from_config(&Config::load_validated(None)?).await?;
//!
//! // New visitor: no key yet
//! let mut session = backend.session(None);
//! session.insert("user_id", 42).await?;
//! session.save(false).await?;
//! let key = session.key().unwrap().to_string();
//!
//! // Later request with the same key
//! let mut session = backend.session(Some(&key));
//! assert_eq!(session.get("user_id").await?, Some(&42.into()));
//! ```
//!
//! ## Storage Architecture
//!
//! - Durable records live in `~/.local/share/tandem/sessions.db` unless
//!   `store.path` is configured. Reads go through this store only.
//! - Every save is copied into the cache under `prefix:key` with a TTL equal
//!   to the session lifetime. Cache write failures never fail a save.

pub mod backend;
pub mod cache;
pub mod error;
pub mod lifecycle;
pub mod namespace;
pub mod store;

// Re-export commonly used types
pub use backend::{RecordInspection, SessionBackend, SessionBackendBuilder, SessionSettings};
#[cfg(feature = "redis")]
pub use cache::RedisCache;
pub use cache::{CacheClient, CacheError, MemoryCache};
pub use error::{Result, SessionError};
pub use lifecycle::{LoadOutcome, SessionLifecycle};
pub use namespace::physical_key;
pub use store::{RecordStore, SqliteRecordStore, StoreError, WriteMode};
