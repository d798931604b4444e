// Redis cache backend module
//
// Shared, network-backed cache. Values are encoded with the configured
// codec; counters use native INCRBY/DECRBY so they stay atomic across
// every process sharing the server.

pub mod backend;
pub mod key;

pub use backend::RedisBackend;
