//! Payload codecs.
//!
//! A codec turns a [`SessionPayload`] into the opaque string stored in the
//! durable record (and mirrored to the cache), and back. Decoding untrusted
//! input must fail with a [`CodecError`] rather than panic; callers treat any
//! decode failure as an absent session.

use std::fmt;

use base64::{prelude::BASE64_STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::session::SessionPayload;

type HmacSha256 = Hmac<Sha256>;

/// Salt mixed into the signing key so session signatures cannot be replayed
/// as signatures for other values signed with the same secret.
const SIGNING_SALT: &[u8] = b"tandem.session.SignedCodec";

/// Errors produced while encoding or decoding payloads.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed session data: {0}")]
    Malformed(String),

    #[error("Session data signature mismatch")]
    BadSignature,

    #[error("Session data is not a JSON object")]
    NotAnObject,

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes session payloads to and from a transport string.
pub trait PayloadCodec: Send + Sync {
    /// Encode a payload.
    fn encode(&self, payload: &SessionPayload) -> Result<String, CodecError>;

    /// Decode a payload, failing on malformed or tampered input.
    fn decode(&self, data: &str) -> Result<SessionPayload, CodecError>;
}

fn parse_object(json: &[u8]) -> Result<SessionPayload, CodecError> {
    match serde_json::from_slice(json)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(CodecError::NotAnObject),
    }
}

/// Plain JSON object text, no integrity protection.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, payload: &SessionPayload) -> Result<String, CodecError> {
        Ok(serde_json::to_string(payload)?)
    }

    fn decode(&self, data: &str) -> Result<SessionPayload, CodecError> {
        parse_object(data.as_bytes())
    }
}

/// Tamper-evident codec: `base64(hex(hmac) ":" json)`.
#[derive(Clone)]
pub struct SignedCodec {
    mac: HmacSha256,
}

impl SignedCodec {
    /// Create a codec keyed by `secret`.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CodecError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CodecError::InvalidKey("secret must not be empty".into()));
        }

        let mut key = Vec::with_capacity(SIGNING_SALT.len() + secret.len());
        key.extend_from_slice(SIGNING_SALT);
        key.extend_from_slice(secret);

        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for SignedCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedCodec").finish_non_exhaustive()
    }
}

impl PayloadCodec for SignedCodec {
    fn encode(&self, payload: &SessionPayload) -> Result<String, CodecError> {
        let json = serde_json::to_string(payload)?;
        let signature = hex::encode(self.sign(json.as_bytes()));
        Ok(BASE64_STANDARD.encode(format!("{}:{}", signature, json)))
    }

    fn decode(&self, data: &str) -> Result<SessionPayload, CodecError> {
        let raw = BASE64_STANDARD
            .decode(data.trim())
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        let split = raw
            .iter()
            .position(|b| *b == b':')
            .ok_or_else(|| CodecError::Malformed("missing signature separator".into()))?;
        let (signature_hex, json) = (&raw[..split], &raw[split + 1..]);

        let provided = hex::decode(signature_hex).map_err(|_| CodecError::BadSignature)?;
        let expected = self.sign(json);
        if !bool::from(expected.ct_eq(&provided)) {
            return Err(CodecError::BadSignature);
        }

        parse_object(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> SessionPayload {
        match json!({"user_id": 42, "cart": ["a", "b"], "flags": {"beta": true}}) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_signed_round_trip() {
        let codec = SignedCodec::new("s3cret").unwrap();
        let encoded = codec.encode(&payload()).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), payload());
    }

    #[test]
    fn test_signed_rejects_tampered_json() {
        let codec = SignedCodec::new("s3cret").unwrap();
        let encoded = codec.encode(&payload()).unwrap();

        let raw = String::from_utf8(BASE64_STANDARD.decode(&encoded).unwrap()).unwrap();
        let tampered = raw.replace("42", "43");
        let forged = BASE64_STANDARD.encode(tampered);

        assert!(matches!(codec.decode(&forged), Err(CodecError::BadSignature)));
    }

    #[test]
    fn test_signed_rejects_other_secret() {
        let encoded = SignedCodec::new("one").unwrap().encode(&payload()).unwrap();
        let result = SignedCodec::new("two").unwrap().decode(&encoded);
        assert!(matches!(result, Err(CodecError::BadSignature)));
    }

    #[test]
    fn test_signed_rejects_garbage() {
        let codec = SignedCodec::new("s3cret").unwrap();
        assert!(matches!(codec.decode("%%%not base64%%%"), Err(CodecError::Malformed(_))));

        let no_separator = BASE64_STANDARD.encode("deadbeef");
        assert!(matches!(codec.decode(&no_separator), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_signed_requires_secret() {
        assert!(matches!(SignedCodec::new(""), Err(CodecError::InvalidKey(_))));
    }

    #[test]
    fn test_json_codec_rejects_non_objects() {
        assert!(matches!(JsonCodec.decode("[1, 2]"), Err(CodecError::NotAnObject)));
        assert!(matches!(JsonCodec.decode("{not json"), Err(CodecError::Json(_))));
        assert_eq!(JsonCodec.decode(r#"{"a":1}"#).unwrap()["a"], json!(1));
    }
}
