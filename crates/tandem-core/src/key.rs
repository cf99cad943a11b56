//! Session keys and key generation.

use std::fmt;

use rand::Rng;
use serde::Serialize;

/// Characters used in generated session keys.
const KEY_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of generated session keys.
pub const KEY_LENGTH: usize = 32;

/// Shortest caller-supplied key accepted as a session key.
pub const MIN_KEY_LENGTH: usize = 8;

/// Opaque session identifier.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Accept a caller-supplied key.
    ///
    /// Keys shorter than [`MIN_KEY_LENGTH`] are rejected so that a truncated
    /// or empty cookie never addresses a real session.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() < MIN_KEY_LENGTH {
            return None;
        }
        Some(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of fresh session identifiers.
///
/// Implementations must be cryptographically strong; uniqueness is still
/// enforced by the record store, so a collision only costs a retry.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> SessionKey;
}

/// Generates 32-character `[a-z0-9]` keys from the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> SessionKey {
        let mut rng = rand::rng();
        let key: String = (0..KEY_LENGTH)
            .map(|_| KEY_CHARS[rng.random_range(0..KEY_CHARS.len())] as char)
            .collect();
        SessionKey(key)
    }
}
