// Kura cache library
// Memory, file and Redis caches behind one manager

pub mod cache;
pub mod constants;
pub mod logging;

pub use cache::{
    AsyncCache, Cache, CacheError, CacheManager, KeyTtl, ManagerConfig,
};
