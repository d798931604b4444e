//! Process-wide cache manager
//!
//! The shared manager is created lazily from `ManagerConfig::default()`
//! unless `configure_cache_manager` installs one first. A single mutex
//! guards both lazy creation and replacement.

use parking_lot::Mutex;
use std::sync::Arc;

use super::config::ManagerConfig;
use super::error::CacheError;
use super::facade::{AsyncCache, Cache};
use super::manager::CacheManager;

static GLOBAL_MANAGER: Mutex<Option<Arc<CacheManager>>> = Mutex::new(None);

/// The shared manager, created with the default configuration on first use
pub fn cache_manager() -> Result<Arc<CacheManager>, CacheError> {
    let mut slot = GLOBAL_MANAGER.lock();
    if let Some(manager) = slot.as_ref() {
        return Ok(Arc::clone(manager));
    }
    let manager = Arc::new(CacheManager::new(ManagerConfig::default())?);
    *slot = Some(Arc::clone(&manager));
    Ok(manager)
}

/// Replace the shared manager, closing the previous one
///
/// Handles obtained from the previous manager report Closed afterwards.
pub fn configure_cache_manager(config: ManagerConfig) -> Result<Arc<CacheManager>, CacheError> {
    let manager = Arc::new(CacheManager::new(config)?);
    let previous = GLOBAL_MANAGER.lock().replace(Arc::clone(&manager));
    if let Some(previous) = previous {
        if let Err(e) = previous.close() {
            tracing::warn!(error = %e, "Failed to close previous cache manager");
        }
    }
    Ok(manager)
}

/// Blocking handle on the shared manager's default backend
pub fn cache() -> Result<Cache, CacheError> {
    Ok(Cache::new(cache_manager()?, None))
}

/// Async handle on the shared manager's default backend
pub fn async_cache() -> Result<AsyncCache, CacheError> {
    Ok(AsyncCache::new(cache_manager()?, None))
}

/// Close and drop the shared manager; the next access creates a fresh one
pub fn reset_cache_manager() -> Result<(), CacheError> {
    let previous = GLOBAL_MANAGER.lock().take();
    match previous {
        Some(manager) => manager.close(),
        None => Ok(()),
    }
}
