//! Sync/async bridging
//!
//! Backends implement whichever contract suits their substrate. The adapters
//! here derive the other one:
//! - `BlockingAdapter` exposes a `CacheBackend` as an `AsyncCacheBackend`,
//!   either inline (cheap in-memory work) or offloaded to tokio's blocking
//!   pool (filesystem I/O)
//! - `AsyncAdapter` exposes an `AsyncCacheBackend` as a `CacheBackend` by
//!   driving the future on a dedicated process-wide runtime
//!
//! The bridge runtime lives for the rest of the process. Connections opened
//! on it (Redis) therefore outlive any caller's own runtime, and the
//! blocking path works both from plain threads and from inside another
//! runtime.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::constants::BRIDGE_WORKER_THREADS;

use super::entry::KeyTtl;
use super::error::CacheError;
use super::traits::{AsyncCacheBackend, BackendKind, CacheBackend};

static BRIDGE_RUNTIME: OnceLock<Result<Runtime, String>> = OnceLock::new();

fn bridge_runtime() -> Result<&'static Runtime, CacheError> {
    BRIDGE_RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(BRIDGE_WORKER_THREADS)
                .thread_name("kura-bridge")
                .enable_all()
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| CacheError::Backend(format!("failed to start bridge runtime: {}", e)))
}

/// Handle to the process-wide bridge runtime
pub fn bridge_handle() -> Result<Handle, CacheError> {
    Ok(bridge_runtime()?.handle().clone())
}

/// Run a future to completion on the bridge runtime, blocking the caller
pub fn block_on<F>(future: F) -> Result<F::Output, CacheError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let task = bridge_runtime()?.spawn(future);
    futures::executor::block_on(task)
        .map_err(|e| CacheError::Backend(format!("bridged task failed: {}", e)))
}

/// Where a `BlockingAdapter` runs the wrapped calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingMode {
    /// Call directly on the polling task
    Inline,
    /// Move the call onto tokio's blocking thread pool
    Offload,
}

/// Async view of a blocking backend
pub struct BlockingAdapter {
    inner: Arc<dyn CacheBackend>,
    mode: BlockingMode,
}

impl BlockingAdapter {
    pub fn new(inner: Arc<dyn CacheBackend>, mode: BlockingMode) -> Self {
        Self { inner, mode }
    }

    async fn run<R, F>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&dyn CacheBackend) -> Result<R, CacheError> + Send + 'static,
        R: Send + 'static,
    {
        match self.mode {
            BlockingMode::Inline => f(self.inner.as_ref()),
            BlockingMode::Offload => match Handle::try_current() {
                Ok(handle) => {
                    let inner = Arc::clone(&self.inner);
                    handle
                        .spawn_blocking(move || f(inner.as_ref()))
                        .await
                        .map_err(|e| {
                            CacheError::Backend(format!("blocking cache task failed: {}", e))
                        })?
                }
                // Not inside tokio: nothing to offload to
                Err(_) => f(self.inner.as_ref()),
            },
        }
    }
}

#[async_trait]
impl AsyncCacheBackend for BlockingAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.get(&key)).await
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let key = key.to_string();
        self.run(move |b| b.set(&key, value, ttl)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.delete(&key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.exists(&key)).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.run(|b| b.clear()).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError> {
        let keys = keys.to_vec();
        self.run(move |b| b.get_many(&keys)).await
    }

    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.run(move |b| b.set_many(entries, ttl)).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        let keys = keys.to_vec();
        self.run(move |b| b.delete_many(&keys)).await
    }

    async fn incr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.incr(&key, amount, ttl)).await
    }

    async fn decr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.decr(&key, amount, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.ttl(&key)).await
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run(move |b| b.touch(&key, ttl)).await
    }

    async fn is_healthy(&self) -> bool {
        self.run(|b| Ok(b.is_healthy())).await.unwrap_or(false)
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.run(|b| b.close()).await
    }
}

/// Blocking view of a non-blocking backend
pub struct AsyncAdapter {
    inner: Arc<dyn AsyncCacheBackend>,
}

impl AsyncAdapter {
    pub fn new(inner: Arc<dyn AsyncCacheBackend>) -> Self {
        Self { inner }
    }

    fn run<R, F, Fut>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(Arc<dyn AsyncCacheBackend>) -> Fut,
        Fut: Future<Output = Result<R, CacheError>> + Send + 'static,
        R: Send + 'static,
    {
        block_on(f(Arc::clone(&self.inner)))?
    }
}

impl CacheBackend for AsyncAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.get(&key).await })
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.set(&key, value, ttl).await })
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.delete(&key).await })
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.exists(&key).await })
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.run(|b| async move { b.clear().await })
    }

    fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError> {
        let keys = keys.to_vec();
        self.run(move |b| async move { b.get_many(&keys).await })
    }

    fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.run(move |b| async move { b.set_many(entries, ttl).await })
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        let keys = keys.to_vec();
        self.run(move |b| async move { b.delete_many(&keys).await })
    }

    fn incr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.incr(&key, amount, ttl).await })
    }

    fn decr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.decr(&key, amount, ttl).await })
    }

    fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.ttl(&key).await })
    }

    fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run(move |b| async move { b.touch(&key, ttl).await })
    }

    fn is_healthy(&self) -> bool {
        self.run(|b| async move { Ok(b.is_healthy().await) })
            .unwrap_or(false)
    }

    fn close(&self) -> Result<(), CacheError> {
        self.run(|b| async move { b.close().await })
    }
}
