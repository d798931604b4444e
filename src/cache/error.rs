//! Cache error types
//!
//! Every failure surfaced by a backend, the manager or the facade is a
//! `CacheError`. A cache miss is never an error.

use thiserror::Error;

/// Cache error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Invalid manager or backend configuration, or an unknown backend name
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Key is empty after normalization or otherwise unusable
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend could not be reached (refused, dropped, I/O on the socket)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Backend did not answer in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Substrate failure not otherwise classified
    #[error("Backend error: {0}")]
    Backend(String),

    /// Operation attempted after the manager or backend was closed
    #[error("Cache closed: {0}")]
    Closed(String),
}

/// Coarse classification of a `CacheError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheErrorKind {
    Configuration,
    InvalidKey,
    Serialization,
    Connection,
    Timeout,
    Backend,
    Closed,
}

impl CacheErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheErrorKind::Configuration => "configuration",
            CacheErrorKind::InvalidKey => "key_error",
            CacheErrorKind::Serialization => "serialization",
            CacheErrorKind::Connection => "connection",
            CacheErrorKind::Timeout => "timeout",
            CacheErrorKind::Backend => "backend_error",
            CacheErrorKind::Closed => "closed",
        }
    }
}

impl std::fmt::Display for CacheErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CacheError {
    pub fn kind(&self) -> CacheErrorKind {
        match self {
            CacheError::Configuration(_) => CacheErrorKind::Configuration,
            CacheError::InvalidKey(_) => CacheErrorKind::InvalidKey,
            CacheError::Serialization(_) => CacheErrorKind::Serialization,
            CacheError::Connection(_) => CacheErrorKind::Connection,
            CacheError::Timeout(_) => CacheErrorKind::Timeout,
            CacheError::Backend(_) => CacheErrorKind::Backend,
            CacheError::Closed(_) => CacheErrorKind::Closed,
        }
    }

    /// Transient failures a caller may retry. Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Connection(_) | CacheError::Timeout(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Backend(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CacheError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        CacheError::Serialization(format!("MessagePack encoding failed: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for CacheError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        CacheError::Serialization(format!("MessagePack decoding failed: {}", err))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CacheError::Timeout(format!("Redis timed out: {}", err))
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error()
        {
            CacheError::Connection(format!("Redis connection failed: {}", err))
        } else {
            CacheError::Backend(format!("Redis error: {}", err))
        }
    }
}
