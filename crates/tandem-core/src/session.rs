//! Session payload and durable record types.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::key::SessionKey;

/// The session's data bag.
pub type SessionPayload = Map<String, Value>;

/// A durable session row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    /// Session key (primary key)
    pub key: SessionKey,
    /// Payload as produced by the configured codec
    pub data: String,
    /// Instant after which the record counts as absent
    pub expire_date: DateTime<Utc>,
}

impl SessionRecord {
    /// Create a record that expires `max_age` from now.
    pub fn new(key: SessionKey, data: impl Into<String>, max_age: Duration) -> Self {
        Self {
            key,
            data: data.into(),
            expire_date: Utc::now() + max_age,
        }
    }

    /// Whether the record is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_date <= now
    }

    /// Time left before expiry, zero if already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expire_date - now).max(Duration::zero())
    }
}
