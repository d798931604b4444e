//! Unified cache access
//!
//! One `CacheManager` owns any number of named backends (in-process memory,
//! local files, Redis) and exposes the same operations over each of them,
//! both as blocking calls and as futures. Each backend implements one of the
//! two calling conventions natively; `bridge` derives the other.
//!
//! Values are `serde_json::Value`. A miss is `None`, so a stored JSON null
//! stays distinguishable from an absent key. `Cache` and `AsyncCache` add
//! typed access on top.

pub mod bridge;
pub mod clock;
pub mod codec;
pub mod config;
pub mod disk;
pub mod entry;
pub mod error;
pub mod facade;
pub mod factory;
pub mod global;
pub mod manager;
pub mod memory;
pub mod operation;
pub mod redis;
pub mod stats;
pub mod traits;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{JsonCodec, MessagePackCodec, SerializerKind, TextCodec, ValueCodec};
pub use config::{
    BackendConfig, FileBackendConfig, ManagerConfig, MemoryBackendConfig, RedisBackendConfig,
};
pub use disk::FileBackend;
pub use entry::{CacheEntry, KeyTtl};
pub use error::{CacheError, CacheErrorKind};
pub use facade::{AsyncCache, Cache};
pub use factory::{Backend, BackendFactory};
pub use global::{async_cache, cache, cache_manager, configure_cache_manager, reset_cache_manager};
pub use manager::CacheManager;
pub use memory::MemoryBackend;
pub use operation::CacheOperation;
pub use self::redis::RedisBackend;
pub use stats::{BackendStats, CacheStats};
pub use traits::{AsyncCacheBackend, BackendKind, CacheBackend};
