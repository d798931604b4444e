//! Backend construction
//!
//! `BackendFactory` turns a `BackendConfig` into a `Backend`: the concrete
//! implementation plus the adapter that provides its other calling
//! convention.

use std::sync::Arc;

use super::bridge::{AsyncAdapter, BlockingAdapter, BlockingMode};
use super::clock::{Clock, SystemClock};
use super::codec::default_serializer;
use super::config::BackendConfig;
use super::disk::FileBackend;
use super::error::CacheError;
use super::memory::MemoryBackend;
use super::redis::RedisBackend;
use super::traits::{AsyncCacheBackend, BackendKind, CacheBackend};

/// A constructed backend, usable from both sync and async code
///
/// Both views wrap the same underlying instance, so closing through either
/// closes it.
#[derive(Clone)]
pub struct Backend {
    name: String,
    kind: BackendKind,
    blocking: Arc<dyn CacheBackend>,
    non_blocking: Arc<dyn AsyncCacheBackend>,
}

impl Backend {
    /// Wrap a naturally blocking backend
    pub fn from_blocking(inner: Arc<dyn CacheBackend>, mode: BlockingMode) -> Self {
        let non_blocking: Arc<dyn AsyncCacheBackend> =
            Arc::new(BlockingAdapter::new(Arc::clone(&inner), mode));
        Self {
            name: inner.name().to_string(),
            kind: inner.kind(),
            blocking: inner,
            non_blocking,
        }
    }

    /// Wrap a naturally non-blocking backend
    pub fn from_async(inner: Arc<dyn AsyncCacheBackend>) -> Self {
        let blocking: Arc<dyn CacheBackend> = Arc::new(AsyncAdapter::new(Arc::clone(&inner)));
        Self {
            name: inner.name().to_string(),
            kind: inner.kind(),
            blocking,
            non_blocking: inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn blocking(&self) -> &Arc<dyn CacheBackend> {
        &self.blocking
    }

    pub fn non_blocking(&self) -> &Arc<dyn AsyncCacheBackend> {
        &self.non_blocking
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

pub struct BackendFactory;

impl BackendFactory {
    /// Build a backend from its configuration
    ///
    /// # Errors
    ///
    /// Returns CacheError::Configuration for invalid settings (missing
    /// directory, bad Redis URL). Redis does not connect here.
    pub fn create(config: &BackendConfig) -> Result<Backend, CacheError> {
        Self::create_with_clock(config, Arc::new(SystemClock))
    }

    /// Like `create`, with an explicit time source for the local backends.
    /// Redis expiry is kept by the server and ignores the clock.
    pub fn create_with_clock(
        config: &BackendConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Backend, CacheError> {
        config.validate().map_err(|e| {
            CacheError::Configuration(format!("backend '{}': {}", config.name(), e))
        })?;

        let backend = match config {
            BackendConfig::Memory(c) => Backend::from_blocking(
                Arc::new(MemoryBackend::with_clock(c, clock)),
                BlockingMode::Inline,
            ),
            BackendConfig::File(c) => Backend::from_blocking(
                Arc::new(FileBackend::with_parts(
                    c,
                    default_serializer(c.serializer),
                    clock,
                )?),
                BlockingMode::Offload,
            ),
            BackendConfig::Redis(c) => Backend::from_async(Arc::new(RedisBackend::new(c)?)),
        };

        tracing::debug!(
            backend = %backend.name(),
            kind = %backend.kind(),
            "Created cache backend"
        );
        Ok(backend)
    }
}
