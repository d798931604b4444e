//! Backend contract
//!
//! Every backend implements one of two traits with the same operation set:
//! `CacheBackend` for substrates that are naturally blocking (memory, file)
//! and `AsyncCacheBackend` for substrates that are naturally non-blocking
//! (Redis). The adapters in `bridge` derive the other flavor, so the
//! manager always has both.
//!
//! Semantics shared by both traits:
//! - a miss is `Ok(None)`, never an error
//! - an expired entry behaves exactly like a missing one and is purged
//!   when a read discovers it
//! - a zero TTL means "already expired": nothing is stored and any
//!   existing entry for the key is removed
//! - `incr`/`decr` start absent keys at zero, are atomic per key, reset the
//!   expiry when a TTL is given and keep the existing expiry otherwise
//! - `is_healthy` never fails
//! - `close` is idempotent; afterwards operations fail with `CacheError::Closed`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use super::entry::KeyTtl;
use super::error::CacheError;

/// Backend kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    File,
    Redis,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::File => "file",
            BackendKind::Redis => "redis",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocking backend contract
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Get a value by key; `None` if missing or expired
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value, overwriting any existing entry
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns true if the key existed and was removed
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry owned by this backend
    fn clear(&self) -> Result<(), CacheError>;

    /// Missing keys are simply absent from the result
    fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError>;

    fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Returns how many keys were removed
    fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError>;

    fn incr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError>;

    fn decr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError>;

    fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError>;

    /// Reapply an expiry without changing the value; false if the key is absent
    fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    fn is_healthy(&self) -> bool;

    fn close(&self) -> Result<(), CacheError>;
}

/// Non-blocking backend contract, same semantics as `CacheBackend`
#[async_trait]
pub trait AsyncCacheBackend: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError>;

    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError>;

    async fn incr(&self, key: &str, amount: u64, ttl: Option<Duration>)
        -> Result<i64, CacheError>;

    async fn decr(&self, key: &str, amount: u64, ttl: Option<Duration>)
        -> Result<i64, CacheError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError>;

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn is_healthy(&self) -> bool;

    async fn close(&self) -> Result<(), CacheError>;
}
