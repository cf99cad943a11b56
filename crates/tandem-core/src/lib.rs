//! # tandem-core
//!
//! Core types and abstractions for Tandem, a dual-store session backend.
//!
//! This crate provides:
//! - Session keys and the key generator seam
//! - Session payload and durable record types
//! - Payload codecs (signed and plain JSON)
//! - Configuration system
//! - Common error types

pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod session;

pub use codec::{CodecError, JsonCodec, PayloadCodec, SignedCodec};
pub use config::{CacheBackendKind, CacheFormat, CodecKind, Config};
pub use error::{Error, Result};
pub use key::{KeyGenerator, RandomKeyGenerator, SessionKey};
pub use session::{SessionPayload, SessionRecord};
