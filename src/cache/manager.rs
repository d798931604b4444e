//! Cache manager
//!
//! Owns the configured backends and routes every operation to one of them.
//! The manager normalizes keys, resolves which backend an operation targets,
//! records per-backend statistics and owns backend lifecycle. Values and
//! errors pass through unchanged.
//!
//! Resolution order for the target backend:
//! 1. the name passed with the operation
//! 2. the configured `default_backend`
//! 3. the only backend, when exactly one is registered
//!
//! Anything else (several backends, no default) is a configuration error.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::config::ManagerConfig;
use super::entry::KeyTtl;
use super::error::CacheError;
use super::facade::{AsyncCache, Cache};
use super::factory::{Backend, BackendFactory};
use super::operation::CacheOperation;
use super::stats::{BackendStats, CacheStats, StatsTracker};
use super::traits::BackendKind;
use super::utils::normalize_key;

struct Registered {
    backend: Backend,
    stats: StatsTracker,
    closed: AtomicBool,
}

impl Registered {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed(format!(
                "backend '{}' is closed",
                self.name()
            )));
        }
        Ok(())
    }

    /// Record the outcome of one operation and pass it through
    fn observe<R>(
        &self,
        op: CacheOperation,
        key: Option<&str>,
        result: Result<R, CacheError>,
        on_ok: impl FnOnce(&StatsTracker, &R),
    ) -> Result<R, CacheError> {
        match &result {
            Ok(value) => on_ok(&self.stats, value),
            Err(e) => {
                self.stats.record_error();
                tracing::warn!(
                    backend = %self.name(),
                    operation = %op,
                    key = key.unwrap_or(""),
                    error_kind = %e.kind(),
                    error = %e,
                    "Cache operation failed"
                );
            }
        }
        result
    }
}

/// Registry and dispatcher for named cache backends
pub struct CacheManager {
    backends: Vec<Registered>,
    default_backend: Option<String>,
    closed: AtomicBool,
}

impl CacheManager {
    /// Build every enabled backend described by `config`
    ///
    /// # Errors
    ///
    /// Returns CacheError::Configuration if the configuration is invalid or
    /// a backend cannot be constructed
    pub fn new(config: ManagerConfig) -> Result<Self, CacheError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Like `new`, with an explicit time source for the local backends
    pub fn with_clock(config: ManagerConfig, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::Configuration)?;

        let mut built: Vec<Backend> = Vec::new();
        for backend_config in config.enabled_backends() {
            match BackendFactory::create_with_clock(backend_config, Arc::clone(&clock)) {
                Ok(backend) => built.push(backend),
                Err(e) => {
                    release_partial(&built);
                    return Err(e);
                }
            }
        }

        Self::with_backends(config.default_backend, built)
    }

    /// Register already constructed backends
    pub fn with_backends(
        default_backend: Option<String>,
        backends: Vec<Backend>,
    ) -> Result<Self, CacheError> {
        if backends.is_empty() {
            return Err(CacheError::Configuration(
                "at least one backend must be configured".to_string(),
            ));
        }

        let mut registered: Vec<Registered> = Vec::with_capacity(backends.len());
        for backend in backends {
            if backend.name().trim().is_empty() {
                return Err(CacheError::Configuration(
                    "backend name cannot be empty".to_string(),
                ));
            }
            if registered.iter().any(|r| r.name() == backend.name()) {
                return Err(CacheError::Configuration(format!(
                    "Duplicate backend name: '{}'",
                    backend.name()
                )));
            }
            registered.push(Registered {
                backend,
                stats: StatsTracker::new(),
                closed: AtomicBool::new(false),
            });
        }

        if let Some(default) = &default_backend {
            if !registered.iter().any(|r| r.name() == default) {
                return Err(CacheError::Configuration(format!(
                    "default_backend '{}' is not an enabled backend",
                    default
                )));
            }
        }

        let manager = Self {
            backends: registered,
            default_backend,
            closed: AtomicBool::new(false),
        };
        tracing::info!(
            backends = ?manager.backend_names(),
            default_backend = ?manager.default_backend(),
            "Cache manager initialized"
        );
        Ok(manager)
    }

    /// Names of registered backends in configuration order
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|r| r.name()).collect()
    }

    /// The backend used when an operation names none
    pub fn default_backend(&self) -> Option<&str> {
        match &self.default_backend {
            Some(name) => Some(name.as_str()),
            None if self.backends.len() == 1 => Some(self.backends[0].name()),
            None => None,
        }
    }

    pub fn backend_kind(&self, backend: Option<&str>) -> Result<BackendKind, CacheError> {
        Ok(self.lookup(backend)?.backend.kind())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            return Err(CacheError::Closed("cache manager is closed".to_string()));
        }
        Ok(())
    }

    /// Find the target backend without checking open state
    fn lookup(&self, backend: Option<&str>) -> Result<&Registered, CacheError> {
        let name = match backend {
            Some(name) => name,
            None => self.default_backend().ok_or_else(|| {
                CacheError::Configuration(format!(
                    "no default backend configured and {} backends registered; name one explicitly",
                    self.backends.len()
                ))
            })?,
        };
        self.backends
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| CacheError::Configuration(format!("unknown cache backend '{}'", name)))
    }

    /// Target backend for an operation
    fn resolve(&self, backend: Option<&str>) -> Result<&Registered, CacheError> {
        self.ensure_open()?;
        let entry = self.lookup(backend)?;
        entry.ensure_open()?;
        Ok(entry)
    }

    fn normalize_all<K: AsRef<str>>(keys: &[K]) -> Result<Vec<(String, String)>, CacheError> {
        keys.iter()
            .map(|k| normalize_key(k.as_ref()).map(|n| (n, k.as_ref().to_string())))
            .collect()
    }

    /// Normalize every key, refusing inputs where two keys collapse into one
    fn normalize_entries(
        entries: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>, CacheError> {
        let mut normalized: HashMap<String, (String, Value)> = HashMap::with_capacity(entries.len());
        for (original, value) in entries {
            let key = normalize_key(&original)?;
            if let Some((other, _)) = normalized.get(&key) {
                return Err(CacheError::InvalidKey(format!(
                    "keys {:?} and {:?} both normalize to {:?}",
                    other, original, key
                )));
            }
            normalized.insert(key, (original, value));
        }
        Ok(normalized
            .into_iter()
            .map(|(key, (_, value))| (key, value))
            .collect())
    }

    // Statistics

    pub fn stats(&self, backend: Option<&str>) -> Result<CacheStats, CacheError> {
        Ok(self.lookup(backend)?.stats.snapshot())
    }

    pub fn stats_all(&self) -> BackendStats {
        let mut all = BackendStats::new();
        for entry in &self.backends {
            all.set(entry.name().to_string(), entry.stats.snapshot());
        }
        all
    }

    // Scoped acquisition

    /// Blocking facade pinned to `name`, independent of the default
    pub fn using(self: &Arc<Self>, name: &str) -> Result<Cache, CacheError> {
        let entry = self.resolve(Some(name))?;
        Ok(Cache::new(Arc::clone(self), Some(entry.name().to_string())))
    }

    /// Async facade pinned to `name`, independent of the default
    pub fn using_async(self: &Arc<Self>, name: &str) -> Result<AsyncCache, CacheError> {
        let entry = self.resolve(Some(name))?;
        Ok(AsyncCache::new(Arc::clone(self), Some(entry.name().to_string())))
    }

    /// Run `f` against a facade pinned to `name`
    pub fn with_backend<R>(
        self: &Arc<Self>,
        name: &str,
        f: impl FnOnce(&Cache) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let cache = self.using(name)?;
        f(&cache)
    }

    // Blocking operations

    pub fn get(&self, key: &str, backend: Option<&str>) -> Result<Option<Value>, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().get(&key);
        entry.observe(CacheOperation::Get, Some(&key), result, |stats, found| {
            record_lookup(entry.name(), &key, stats, found.is_some())
        })
    }

    pub fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<(), CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().set(&key, value, ttl);
        entry.observe(CacheOperation::Set, Some(&key), result, |stats, _| {
            stats.record_sets(1)
        })
    }

    pub fn delete(&self, key: &str, backend: Option<&str>) -> Result<bool, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().delete(&key);
        entry.observe(CacheOperation::Delete, Some(&key), result, |stats, removed| {
            if *removed {
                stats.record_deletes(1)
            }
        })
    }

    pub fn exists(&self, key: &str, backend: Option<&str>) -> Result<bool, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().exists(&key);
        entry.observe(CacheOperation::Exists, Some(&key), result, |_, _| {})
    }

    pub fn clear(&self, backend: Option<&str>) -> Result<(), CacheError> {
        let entry = self.resolve(backend)?;
        let result = entry.backend.blocking().clear();
        entry.observe(CacheOperation::Clear, None, result, |_, _| {
            tracing::debug!(backend = %entry.name(), "Cache cleared")
        })
    }

    /// Values for the keys that are present, keyed as the caller passed them
    pub fn get_many<K: AsRef<str>>(
        &self,
        keys: &[K],
        backend: Option<&str>,
    ) -> Result<HashMap<String, Value>, CacheError> {
        let entry = self.resolve(backend)?;
        let pairs = Self::normalize_all(keys)?;
        let normalized: Vec<String> = pairs.iter().map(|(n, _)| n.clone()).collect();
        let result = entry.backend.blocking().get_many(&normalized);
        let found = entry.observe(CacheOperation::GetMany, None, result, |stats, found| {
            record_bulk_lookup(stats, normalized.len(), found.len())
        })?;
        Ok(restore_keys(pairs, found))
    }

    pub fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<(), CacheError> {
        let entry = self.resolve(backend)?;
        let entries = Self::normalize_entries(entries)?;
        let count = entries.len() as u64;
        let result = entry.backend.blocking().set_many(entries, ttl);
        entry.observe(CacheOperation::SetMany, None, result, |stats, _| {
            stats.record_sets(count)
        })
    }

    pub fn delete_many<K: AsRef<str>>(
        &self,
        keys: &[K],
        backend: Option<&str>,
    ) -> Result<usize, CacheError> {
        let entry = self.resolve(backend)?;
        let normalized: Vec<String> = Self::normalize_all(keys)?
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        let result = entry.backend.blocking().delete_many(&normalized);
        entry.observe(CacheOperation::DeleteMany, None, result, |stats, removed| {
            stats.record_deletes(*removed as u64)
        })
    }

    pub fn incr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<i64, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().incr(&key, amount, ttl);
        entry.observe(CacheOperation::Incr, Some(&key), result, |stats, _| {
            stats.record_sets(1)
        })
    }

    pub fn decr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<i64, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().decr(&key, amount, ttl);
        entry.observe(CacheOperation::Decr, Some(&key), result, |stats, _| {
            stats.record_sets(1)
        })
    }

    pub fn ttl(&self, key: &str, backend: Option<&str>) -> Result<KeyTtl, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().ttl(&key);
        entry.observe(CacheOperation::Ttl, Some(&key), result, |_, _| {})
    }

    pub fn touch(
        &self,
        key: &str,
        ttl: Duration,
        backend: Option<&str>,
    ) -> Result<bool, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.blocking().touch(&key, ttl);
        entry.observe(CacheOperation::Touch, Some(&key), result, |stats, touched| {
            if *touched {
                stats.record_sets(1)
            }
        })
    }

    /// False for unhealthy, closed or unknown backends
    pub fn is_healthy(&self, backend: Option<&str>) -> bool {
        match self.resolve(backend) {
            Ok(entry) => entry.backend.blocking().is_healthy(),
            Err(_) => false,
        }
    }

    // Async operations

    pub async fn get_async(
        &self,
        key: &str,
        backend: Option<&str>,
    ) -> Result<Option<Value>, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().get(&key).await;
        entry.observe(CacheOperation::Get, Some(&key), result, |stats, found| {
            record_lookup(entry.name(), &key, stats, found.is_some())
        })
    }

    pub async fn set_async(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<(), CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().set(&key, value, ttl).await;
        entry.observe(CacheOperation::Set, Some(&key), result, |stats, _| {
            stats.record_sets(1)
        })
    }

    pub async fn delete_async(
        &self,
        key: &str,
        backend: Option<&str>,
    ) -> Result<bool, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().delete(&key).await;
        entry.observe(CacheOperation::Delete, Some(&key), result, |stats, removed| {
            if *removed {
                stats.record_deletes(1)
            }
        })
    }

    pub async fn exists_async(
        &self,
        key: &str,
        backend: Option<&str>,
    ) -> Result<bool, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().exists(&key).await;
        entry.observe(CacheOperation::Exists, Some(&key), result, |_, _| {})
    }

    pub async fn clear_async(&self, backend: Option<&str>) -> Result<(), CacheError> {
        let entry = self.resolve(backend)?;
        let result = entry.backend.non_blocking().clear().await;
        entry.observe(CacheOperation::Clear, None, result, |_, _| {
            tracing::debug!(backend = %entry.name(), "Cache cleared")
        })
    }

    pub async fn get_many_async<K: AsRef<str>>(
        &self,
        keys: &[K],
        backend: Option<&str>,
    ) -> Result<HashMap<String, Value>, CacheError> {
        let entry = self.resolve(backend)?;
        let pairs = Self::normalize_all(keys)?;
        let normalized: Vec<String> = pairs.iter().map(|(n, _)| n.clone()).collect();
        let result = entry.backend.non_blocking().get_many(&normalized).await;
        let found = entry.observe(CacheOperation::GetMany, None, result, |stats, found| {
            record_bulk_lookup(stats, normalized.len(), found.len())
        })?;
        Ok(restore_keys(pairs, found))
    }

    pub async fn set_many_async(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<(), CacheError> {
        let entry = self.resolve(backend)?;
        let entries = Self::normalize_entries(entries)?;
        let count = entries.len() as u64;
        let result = entry.backend.non_blocking().set_many(entries, ttl).await;
        entry.observe(CacheOperation::SetMany, None, result, |stats, _| {
            stats.record_sets(count)
        })
    }

    pub async fn delete_many_async<K: AsRef<str>>(
        &self,
        keys: &[K],
        backend: Option<&str>,
    ) -> Result<usize, CacheError> {
        let entry = self.resolve(backend)?;
        let normalized: Vec<String> = Self::normalize_all(keys)?
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        let result = entry.backend.non_blocking().delete_many(&normalized).await;
        entry.observe(CacheOperation::DeleteMany, None, result, |stats, removed| {
            stats.record_deletes(*removed as u64)
        })
    }

    pub async fn incr_async(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<i64, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().incr(&key, amount, ttl).await;
        entry.observe(CacheOperation::Incr, Some(&key), result, |stats, _| {
            stats.record_sets(1)
        })
    }

    pub async fn decr_async(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
        backend: Option<&str>,
    ) -> Result<i64, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().decr(&key, amount, ttl).await;
        entry.observe(CacheOperation::Decr, Some(&key), result, |stats, _| {
            stats.record_sets(1)
        })
    }

    pub async fn ttl_async(&self, key: &str, backend: Option<&str>) -> Result<KeyTtl, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().ttl(&key).await;
        entry.observe(CacheOperation::Ttl, Some(&key), result, |_, _| {})
    }

    pub async fn touch_async(
        &self,
        key: &str,
        ttl: Duration,
        backend: Option<&str>,
    ) -> Result<bool, CacheError> {
        let entry = self.resolve(backend)?;
        let key = normalize_key(key)?;
        let result = entry.backend.non_blocking().touch(&key, ttl).await;
        entry.observe(CacheOperation::Touch, Some(&key), result, |stats, touched| {
            if *touched {
                stats.record_sets(1)
            }
        })
    }

    pub async fn is_healthy_async(&self, backend: Option<&str>) -> bool {
        match self.resolve(backend) {
            Ok(entry) => entry.backend.non_blocking().is_healthy().await,
            Err(_) => false,
        }
    }

    // Lifecycle

    /// Close every backend once and refuse further operations
    ///
    /// All backends are closed even if one fails; the first failure is returned.
    /// Calling close again is a no-op.
    pub fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for entry in &self.backends {
            if let Err(e) = close_entry(entry) {
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(backends = self.backends.len(), "Cache manager closed");
        first_error.map_or(Ok(()), Err)
    }

    pub async fn close_async(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for entry in &self.backends {
            if let Err(e) = close_entry_async(entry).await {
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(backends = self.backends.len(), "Cache manager closed");
        first_error.map_or(Ok(()), Err)
    }

    /// Close one backend; other backends keep working
    pub fn close_backend(&self, name: &str) -> Result<(), CacheError> {
        let entry = self.lookup(Some(name))?;
        close_entry(entry)
    }

    pub async fn close_backend_async(&self, name: &str) -> Result<(), CacheError> {
        let entry = self.lookup(Some(name))?;
        close_entry_async(entry).await
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("backends", &self.backend_names())
            .field("default_backend", &self.default_backend())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Close backends built before a later one failed to construct
fn release_partial(built: &[Backend]) {
    for backend in built {
        if let Err(e) = backend.blocking().close() {
            tracing::warn!(
                backend = %backend.name(),
                error = %e,
                "Failed to close backend while abandoning construction"
            );
        }
    }
}

fn close_entry(entry: &Registered) -> Result<(), CacheError> {
    if entry.closed.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    let result = entry.backend.blocking().close();
    entry.observe(CacheOperation::Close, None, result, |_, _| {
        tracing::info!(backend = %entry.name(), "Cache backend closed")
    })
}

async fn close_entry_async(entry: &Registered) -> Result<(), CacheError> {
    if entry.closed.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    let result = entry.backend.non_blocking().close().await;
    entry.observe(CacheOperation::Close, None, result, |_, _| {
        tracing::info!(backend = %entry.name(), "Cache backend closed")
    })
}

fn record_lookup(backend: &str, key: &str, stats: &StatsTracker, hit: bool) {
    if hit {
        stats.record_hits(1);
        tracing::debug!(backend = %backend, key = %key, "Cache hit");
    } else {
        stats.record_misses(1);
        tracing::debug!(backend = %backend, key = %key, "Cache miss");
    }
}

fn record_bulk_lookup(stats: &StatsTracker, requested: usize, found: usize) {
    stats.record_hits(found as u64);
    stats.record_misses(requested.saturating_sub(found) as u64);
}

/// Re-key backend results by the caller's original keys
fn restore_keys(
    pairs: Vec<(String, String)>,
    found: HashMap<String, Value>,
) -> HashMap<String, Value> {
    pairs
        .into_iter()
        .filter_map(|(normalized, original)| {
            found.get(&normalized).map(|value| (original, value.clone()))
        })
        .collect()
}
