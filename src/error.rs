//! Error types for the API proxy.

use std::io;

use thiserror::Error;

/// Main error type for proxy operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("wire protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse JSON config: {0}")]
    ParseJson(#[source] serde_json::Error),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cache.max_capacity must be greater than 0")]
    ZeroCacheCapacity,

    #[error("upstream.timeout_secs must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("server.max_payload_bytes must be greater than 0")]
    ZeroPayloadLimit,

    #[error("server.read_timeout_secs must be greater than 0")]
    ZeroReadTimeout,

    #[error("unknown service {name:?} in services section")]
    UnknownService { name: String },

    #[error("services.{name}.cache_ttl_seconds must be greater than 0")]
    ZeroServiceTtl { name: String },

    #[error("service {name:?} has invalid base_url (must start with http:// or https://): {url:?}")]
    InvalidBaseUrl { name: String, url: String },
}

/// Failures talking to an upstream provider.
///
/// These never reach a caller as an error: handlers turn them into a local
/// error envelope.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid request header {name:?}")]
    InvalidHeader { name: String },

    #[error("upstream unavailable for {url}: {reason}")]
    Unavailable { url: String, reason: String },

    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Wire protocol decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("payload is empty")]
    Empty,
}

/// Parameter validation faults raised by handler lookups.
///
/// `Missing`, `Empty` and `Invalid` describe insufficient caller input and are
/// recoverable. `WrongType` means the caller passed a value of the wrong kind
/// and is treated as a programming error by in-process callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("missing parameter: {name}")]
    Missing { name: String },

    #[error("empty parameter: {name}")]
    Empty { name: String },

    #[error("parameter {name} is not a {expected}: {found}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: String,
    },

    #[error("invalid parameter {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("Unknown api requested: {0}")]
    UnknownApi(String),
}

impl ParamError {
    /// Returns true for faults caused by a value of the wrong type.
    #[must_use]
    pub const fn is_type_fault(&self) -> bool {
        matches!(self, Self::WrongType { .. })
    }

    pub(crate) fn missing(name: &str) -> Self {
        Self::Missing {
            name: name.to_string(),
        }
    }

    pub(crate) fn empty(name: &str) -> Self {
        Self::Empty {
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
