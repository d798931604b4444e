//! Typed cache handles
//!
//! `Cache` and `AsyncCache` are thin handles over a shared `CacheManager`,
//! optionally bound to one backend. Typed methods convert through
//! `serde_json::Value`; everything else is forwarded unchanged.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::entry::KeyTtl;
use super::error::CacheError;
use super::manager::CacheManager;
use super::stats::CacheStats;

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Value, CacheError> {
    Ok(serde_json::to_value(value)?)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, CacheError> {
    Ok(serde_json::from_value(value)?)
}

fn decode_many<T: DeserializeOwned>(
    values: HashMap<String, Value>,
) -> Result<HashMap<String, T>, CacheError> {
    values
        .into_iter()
        .map(|(k, v)| decode(v).map(|v| (k, v)))
        .collect()
}

fn encode_many<T: Serialize>(
    entries: &HashMap<String, T>,
) -> Result<HashMap<String, Value>, CacheError> {
    entries
        .iter()
        .map(|(k, v)| encode(v).map(|v| (k.clone(), v)))
        .collect()
}

/// Blocking cache handle
#[derive(Clone)]
pub struct Cache {
    manager: Arc<CacheManager>,
    backend: Option<String>,
}

impl Cache {
    /// Handle that targets `backend`, or the manager's default when `None`
    pub fn new(manager: Arc<CacheManager>, backend: Option<String>) -> Self {
        Self { manager, backend }
    }

    /// The pinned backend, if any
    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    fn target(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    /// Fetch and deserialize a value
    ///
    /// A stored value that does not fit `T` is a Serialization error, not a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get_value(key)?.map(decode).transpose()
    }

    pub fn get_value(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.manager.get(key, self.target())
    }

    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.set_value(key, encode(value)?, ttl)
    }

    pub fn set_value(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.manager.set(key, value, ttl, self.target())
    }

    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.manager.delete(key, self.target())
    }

    pub fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.manager.exists(key, self.target())
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.manager.clear(self.target())
    }

    pub fn get_many<T: DeserializeOwned, K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> Result<HashMap<String, T>, CacheError> {
        decode_many(self.manager.get_many(keys, self.target())?)
    }

    pub fn set_many<T: Serialize>(
        &self,
        entries: &HashMap<String, T>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.manager
            .set_many(encode_many(entries)?, ttl, self.target())
    }

    pub fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> Result<usize, CacheError> {
        self.manager.delete_many(keys, self.target())
    }

    pub fn incr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.manager.incr(key, amount, ttl, self.target())
    }

    pub fn decr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.manager.decr(key, amount, ttl, self.target())
    }

    pub fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        self.manager.ttl(key, self.target())
    }

    pub fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.manager.touch(key, ttl, self.target())
    }

    pub fn is_healthy(&self) -> bool {
        self.manager.is_healthy(self.target())
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        self.manager.stats(self.target())
    }

    /// Close the bound backend, or the whole manager for an unbound handle
    pub fn close(&self) -> Result<(), CacheError> {
        match self.target() {
            Some(name) => self.manager.close_backend(name),
            None => self.manager.close(),
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend)
            .finish()
    }
}

/// Async cache handle
#[derive(Clone)]
pub struct AsyncCache {
    manager: Arc<CacheManager>,
    backend: Option<String>,
}

impl AsyncCache {
    pub fn new(manager: Arc<CacheManager>, backend: Option<String>) -> Self {
        Self { manager, backend }
    }

    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    fn target(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get_value(key).await?.map(decode).transpose()
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.manager.get_async(key, self.target()).await
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value = encode(value)?;
        self.set_value(key, value, ttl).await
    }

    pub async fn set_value(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.manager.set_async(key, value, ttl, self.target()).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.manager.delete_async(key, self.target()).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.manager.exists_async(key, self.target()).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.manager.clear_async(self.target()).await
    }

    pub async fn get_many<T: DeserializeOwned, K: AsRef<str>>(
        &self,
        keys: &[K],
    ) -> Result<HashMap<String, T>, CacheError> {
        decode_many(self.manager.get_many_async(keys, self.target()).await?)
    }

    pub async fn set_many<T: Serialize>(
        &self,
        entries: &HashMap<String, T>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entries = encode_many(entries)?;
        self.manager
            .set_many_async(entries, ttl, self.target())
            .await
    }

    pub async fn delete_many<K: AsRef<str>>(&self, keys: &[K]) -> Result<usize, CacheError> {
        self.manager.delete_many_async(keys, self.target()).await
    }

    pub async fn incr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.manager
            .incr_async(key, amount, ttl, self.target())
            .await
    }

    pub async fn decr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.manager
            .decr_async(key, amount, ttl, self.target())
            .await
    }

    pub async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        self.manager.ttl_async(key, self.target()).await
    }

    pub async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.manager.touch_async(key, ttl, self.target()).await
    }

    pub async fn is_healthy(&self) -> bool {
        self.manager.is_healthy_async(self.target()).await
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        self.manager.stats(self.target())
    }

    pub async fn close(&self) -> Result<(), CacheError> {
        match self.target() {
            Some(name) => self.manager.close_backend_async(name).await,
            None => self.manager.close_async().await,
        }
    }
}

impl std::fmt::Debug for AsyncCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCache")
            .field("backend", &self.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::ManagerConfig;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u32,
        name: String,
    }

    fn cache() -> Cache {
        let manager = Arc::new(CacheManager::new(ManagerConfig::default()).unwrap());
        Cache::new(manager, None)
    }

    #[test]
    fn test_typed_round_trip() {
        let cache = cache();
        let user = User {
            id: 7,
            name: "ana".to_string(),
        };
        cache.set("user:7", &user, None).unwrap();
        assert_eq!(cache.get::<User>("user:7").unwrap(), Some(user));
        assert_eq!(cache.get::<User>("user:8").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_is_serialization_error() {
        let cache = cache();
        cache.set("n", &"not a user", None).unwrap();
        assert!(matches!(
            cache.get::<User>("n"),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_stored_null_is_distinct_from_miss() {
        let cache = cache();
        cache.set_value("nothing", Value::Null, None).unwrap();
        assert_eq!(cache.get::<Option<u32>>("nothing").unwrap(), Some(None));
        assert_eq!(cache.get_value("absent").unwrap(), None);
    }

    #[test]
    fn test_bulk_typed_operations() {
        let cache = cache();
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), 1u32);
        entries.insert("b".to_string(), 2u32);
        cache.set_many(&entries, None).unwrap();

        let found: HashMap<String, u32> = cache.get_many(&["a", "b", "c"]).unwrap();
        assert_eq!(found, entries);
        assert_eq!(cache.delete_many(&["a", "c"]).unwrap(), 1);
    }

    #[test]
    fn test_unbound_close_closes_manager() {
        let cache = cache();
        cache.close().unwrap();
        assert!(cache.manager().is_closed());
        assert!(matches!(cache.get_value("k"), Err(CacheError::Closed(_))));
    }

    #[test]
    fn test_async_handle_driven_by_test_runtime() {
        let manager = Arc::new(CacheManager::new(ManagerConfig::default()).unwrap());
        let cache = AsyncCache::new(manager, None);
        tokio_test::block_on(async {
            tokio_test::assert_ok!(cache.set("k", &3u8, None).await);
            assert_eq!(cache.get::<u8>("k").await.unwrap(), Some(3));
            assert!(cache.delete("k").await.unwrap());
        });
    }

    #[tokio::test]
    async fn test_async_handle() {
        let manager = Arc::new(CacheManager::new(ManagerConfig::default()).unwrap());
        let cache = AsyncCache::new(manager, Some("default".to_string()));
        assert_eq!(cache.backend(), Some("default"));
        cache.set("k", &vec![1, 2, 3], None).await.unwrap();
        assert_eq!(cache.get::<Vec<i32>>("k").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(cache.incr("hits", 1, None).await.unwrap(), 1);
        assert!(cache.is_healthy().await);
        assert_eq!(cache.stats().unwrap().sets, 2);

        cache.close().await.unwrap();
        assert!(!cache.is_healthy().await);
    }
}
