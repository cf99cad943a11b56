//! Error types for session lifecycle operations.

use thiserror::Error;

use tandem_core::CodecError;

use crate::cache::CacheError;
use crate::store::StoreError;

/// Error type for session lifecycle operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// An insert-only write found the key already taken.
    ///
    /// Absorbed by `create`, which retries with a new key.
    #[error("Session key already taken: {0}")]
    CreateConflict(String),

    /// Every attempt to mint a unique key collided.
    #[error("Could not mint a unique session key after {attempts} attempts")]
    KeySpaceExhausted { attempts: u32 },

    /// Durable store failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Cache failure outside the best-effort mirror write.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Payload could not be encoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Backend could not be built from configuration.
    #[error("{0}")]
    Config(#[from] tandem_core::Error),
}

/// Result type for session lifecycle operations.
pub type Result<T> = std::result::Result<T, SessionError>;
