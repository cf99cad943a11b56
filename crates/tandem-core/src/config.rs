//! Configuration system for Tandem.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::codec::{JsonCodec, PayloadCodec, SignedCodec};
use crate::error::Error;

/// Two weeks, in seconds.
pub const DEFAULT_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 7 * 2;

/// Longest accepted session lifetime (ten years), in seconds.
pub const MAX_AGE_LIMIT_SECS: u64 = 60 * 60 * 24 * 365 * 10;

/// Default bound on the create-until-unique loop.
pub const DEFAULT_MAX_CREATE_ATTEMPTS: u32 = 100;

/// Default bound on a single cache round trip, in milliseconds.
pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 1_000;

/// Main configuration struct for Tandem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session lifecycle settings
    pub session: SessionConfig,
    /// Durable record store settings
    pub store: StoreConfig,
    /// Cache mirror settings
    pub cache: CacheConfig,
}

/// Which codec encodes session payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Signed,
    Json,
}

/// What the cache mirror holds for each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheFormat {
    /// The same codec output as the durable record
    Encoded,
    /// The payload as a plain JSON object, for consumers without the codec
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a saved session; sets durable expiry and cache TTL
    pub max_age_secs: u64,
    /// Namespace for cache keys (empty means none)
    pub key_prefix: String,
    /// Payload codec
    pub codec: CodecKind,
    /// Signing secret for the signed codec
    pub secret_key: Option<String>,
    /// Attempts before giving up on minting a unique key
    pub max_create_attempts: u32,
    /// Representation written to the cache
    pub cache_format: CacheFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_MAX_AGE_SECS,
            key_prefix: String::new(),
            codec: CodecKind::Signed,
            secret_key: None,
            max_create_attempts: DEFAULT_MAX_CREATE_ATTEMPTS,
            cache_format: CacheFormat::Encoded,
        }
    }
}

impl SessionConfig {
    /// Build the configured payload codec.
    pub fn build_codec(&self) -> Result<Box<dyn PayloadCodec>, Error> {
        match self.codec {
            CodecKind::Json => Ok(Box::new(JsonCodec)),
            CodecKind::Signed => {
                let secret = self.secret_key.as_deref().unwrap_or_default();
                Ok(Box::new(SignedCodec::new(secret)?))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file (defaults to `<data dir>/tandem/sessions.db`)
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the database path.
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("sessions.db"))
    }
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backend: memory or redis
    pub backend: CacheBackendKind,
    /// Full connection URL; wins over the discrete fields
    pub url: Option<String>,
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Redis logical database
    pub db: i64,
    /// Redis password
    pub password: Option<String>,
    /// Unix domain socket; wins over host/port
    pub unix_socket_path: Option<PathBuf>,
    /// Server lacks SETEX; mirror with SET followed by EXPIRE
    pub legacy_commands: bool,
    /// Bound on connecting and on each command round trip
    pub timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            url: None,
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
            unix_socket_path: None,
            legacy_commands: false,
            timeout_ms: DEFAULT_CACHE_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Resolve the Redis connection URL.
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }

        if let Some(ref socket) = self.unix_socket_path {
            let mut url = format!("redis+unix://{}?db={}", socket.display(), self.db);
            if let Some(ref password) = self.password {
                url.push_str(&format!("&pass={}", urlencoding::encode(password)));
            }
            return url;
        }

        let auth = self
            .password
            .as_ref()
            .map(|p| format!(":{}@", urlencoding::encode(p)))
            .unwrap_or_default();
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Field path (e.g., "session.max_age_secs")
    pub field: String,
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Load configuration, layering an explicit file over the usual sources.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(Some(path.as_ref())).extract()
    }

    fn figment(extra: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            // Default values
            .merge(Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            // Project config
            .merge(Toml::file("tandem.toml"));

        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }

        // Environment variables, e.g. TANDEM_SESSION__KEY_PREFIX
        figment.merge(Env::prefixed("TANDEM_").split("__"))
    }

    /// Load and validate configuration.
    pub fn load_validated(path: Option<&Path>) -> Result<Self, Error> {
        let config = match path {
            Some(path) => Self::load_from(path),
            None => Self::load(),
        }
        .map_err(|e| Error::Config(e.to_string()))?;

        config.ensure_valid()?;
        Ok(config)
    }

    /// Fail on validation errors, logging warnings.
    pub fn ensure_valid(&self) -> Result<(), Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Validation(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.session.max_age_secs == 0 {
            result.add_error("session.max_age_secs", "max_age_secs must be greater than 0");
        }

        if self.session.max_age_secs > MAX_AGE_LIMIT_SECS {
            result.add_error(
                "session.max_age_secs",
                format!("max_age_secs cannot exceed {} (ten years)", MAX_AGE_LIMIT_SECS),
            );
        }

        if self.session.max_create_attempts == 0 {
            result.add_error(
                "session.max_create_attempts",
                "max_create_attempts must be greater than 0",
            );
        }

        if self.session.key_prefix.contains(char::is_whitespace) {
            result.add_error("session.key_prefix", "key_prefix cannot contain whitespace");
        }

        if self.session.codec == CodecKind::Signed {
            match self.session.secret_key.as_deref() {
                None | Some("") => result.add_error(
                    "session.secret_key",
                    "secret_key is required when codec = \"signed\"",
                ),
                Some(secret) if secret.len() < 16 => result.add_warning(
                    "session.secret_key",
                    "secret_key is short (< 16 bytes), signatures are easier to brute force",
                ),
                Some(_) => {}
            }
        }

        if self.session.codec == CodecKind::Json {
            result.add_warning(
                "session.codec",
                "json codec stores payloads without integrity protection",
            );
        }

        if self.cache.backend == CacheBackendKind::Redis {
            if let Some(ref url) = self.cache.url {
                let valid_schemes = ["redis://", "rediss://", "redis+unix://", "unix://"];
                if !valid_schemes.iter().any(|s| url.starts_with(s)) {
                    result.add_error(
                        "cache.url",
                        format!("url must start with one of {:?}", valid_schemes),
                    );
                }
            }
            if self.cache.db < 0 {
                result.add_error("cache.db", "db cannot be negative");
            }
            if self.cache.timeout_ms == 0 {
                result.add_error("cache.timeout_ms", "timeout_ms must be greater than 0");
            }
        }

        if self.cache.backend == CacheBackendKind::Memory {
            result.add_warning(
                "cache.backend",
                "memory cache is process-local; external consumers cannot read the mirror",
            );
        }

        result
    }

    /// Render the configuration as TOML, hiding secrets.
    pub fn to_redacted_toml(&self) -> Result<String, Error> {
        let mut shown = self.clone();
        if shown.session.secret_key.is_some() {
            shown.session.secret_key = Some("********".to_string());
        }
        if shown.cache.password.is_some() {
            shown.cache.password = Some("********".to_string());
        }
        Ok(toml::to_string_pretty(&shown)?)
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("tandem"))
            .unwrap_or_else(|| PathBuf::from("~/.config/tandem"))
    }

    /// Get the data directory (for the session database).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("tandem"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/tandem"))
    }
}
