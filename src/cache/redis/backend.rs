// Redis cache implementation
//
// The connection is opened lazily on first use and shared afterwards.
// ConnectionManager multiplexes commands and reconnects on its own; it is
// created on the bridge runtime so its driver task outlives any caller's
// runtime.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::cache::bridge::bridge_handle;
use crate::cache::codec::{
    default_serializer, encode_native_integer, parse_native_integer, ValueCodec,
};
use crate::cache::config::RedisBackendConfig;
use crate::cache::entry::KeyTtl;
use crate::cache::error::CacheError;
use crate::cache::operation::CacheOperation;
use crate::cache::traits::{AsyncCacheBackend, BackendKind};
use crate::cache::utils::{is_immediate_expiry, ttl_millis};
use crate::constants::REDIS_SCAN_COUNT;

use super::key::{format_key, is_own_key, namespace_pattern, validate_key};

/// Redis-based distributed cache backend
///
/// Every key is namespaced under the configured prefix, so several
/// backends (or applications) can share one server and `clear` only
/// touches this backend's keys.
///
/// Integer values are stored as native Redis integers whatever the codec,
/// so counters written by `incr` read back through `get` and values written
/// by `set` can be incremented.
pub struct RedisBackend {
    name: String,
    client: Client,
    key_prefix: String,
    codec: Arc<dyn ValueCodec>,
    connection_timeout: Duration,
    operation_timeout: Duration,
    connection: Mutex<Option<ConnectionManager>>,
    closed: AtomicBool,
}

impl RedisBackend {
    /// Creates a new RedisBackend. No connection is made until first use.
    ///
    /// # Errors
    ///
    /// Returns CacheError::Configuration if the URL is missing or invalid
    pub fn new(config: &RedisBackendConfig) -> Result<Self, CacheError> {
        Self::with_codec(config, default_serializer(config.serializer))
    }

    pub fn with_codec(
        config: &RedisBackendConfig,
        codec: Arc<dyn ValueCodec>,
    ) -> Result<Self, CacheError> {
        config.validate().map_err(|e| {
            CacheError::Configuration(format!("redis backend '{}': {}", config.name, e))
        })?;
        let url = config.url.as_deref().ok_or_else(|| {
            CacheError::Configuration(format!("redis backend '{}' has no url", config.name))
        })?;
        let client = Client::open(url).map_err(|e| {
            CacheError::Configuration(format!("Invalid Redis URL for '{}': {}", config.name, e))
        })?;

        Ok(Self {
            name: config.name.clone(),
            client,
            key_prefix: config.resolved_key_prefix(),
            codec,
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
            connection: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed(format!(
                "redis backend '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }

    fn redis_key(&self, key: &str) -> Result<String, CacheError> {
        validate_key(key).map_err(CacheError::InvalidKey)?;
        Ok(format_key(&self.key_prefix, key))
    }

    fn redis_keys(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        keys.iter().map(|k| self.redis_key(k)).collect()
    }

    /// Shared connection, opened on first call
    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        self.ensure_open()?;
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let client = self.client.clone();
        let timeout = self.connection_timeout;
        let connecting = bridge_handle()?
            .spawn(async move { tokio::time::timeout(timeout, ConnectionManager::new(client)).await });

        let conn = match connecting.await {
            Ok(Ok(Ok(conn))) => conn,
            Ok(Ok(Err(e))) => {
                tracing::warn!(backend = %self.name, error = %e, "Redis connection failed");
                return Err(CacheError::Connection(format!(
                    "Failed to connect to Redis for '{}': {}",
                    self.name, e
                )));
            }
            Ok(Err(_)) => {
                tracing::warn!(
                    backend = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Redis connection timed out"
                );
                return Err(CacheError::Connection(format!(
                    "Connecting to Redis for '{}' timed out after {:?}",
                    self.name, timeout
                )));
            }
            Err(e) => {
                return Err(CacheError::Backend(format!(
                    "Redis connect task failed: {}",
                    e
                )))
            }
        };

        tracing::info!(backend = %self.name, prefix = %self.key_prefix, "Connected to Redis");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Run one round trip under the operation timeout
    async fn run<T, F, Fut>(&self, op: CacheOperation, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(self.operation_timeout, f(conn)).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(format!(
                "Redis {} on '{}' exceeded {:?}",
                op, self.name, self.operation_timeout
            ))),
        }
    }

    /// Integers are written natively so INCRBY/DECRBY work with any codec
    fn encode(&self, value: &Value) -> Result<Bytes, CacheError> {
        match encode_native_integer(value) {
            Some(native) => Ok(native),
            None => self.codec.encode(value),
        }
    }

    fn decode(&self, raw: Option<Vec<u8>>) -> Result<Option<Value>, CacheError> {
        raw.map(|bytes| match parse_native_integer(&bytes) {
            Some(n) => Ok(Value::from(n)),
            None => self.codec.decode(&bytes),
        })
        .transpose()
    }

    async fn adjust(
        &self,
        op: CacheOperation,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        let rkey = self.redis_key(key)?;
        let amount = i64::try_from(amount).map_err(|_| {
            CacheError::Backend(format!("amount {} is out of range for Redis", amount))
        })?;
        let command = match op {
            CacheOperation::Decr => "DECRBY",
            _ => "INCRBY",
        };

        match ttl {
            None => {
                self.run(op, move |mut conn| async move {
                    redis::cmd(command)
                        .arg(&rkey)
                        .arg(amount)
                        .query_async(&mut conn)
                        .await
                })
                .await
            }
            Some(ttl) => {
                let mut pipe = redis::pipe();
                pipe.atomic().cmd(command).arg(&rkey).arg(amount);
                if is_immediate_expiry(Some(ttl)) {
                    pipe.cmd("DEL").arg(&rkey).ignore();
                } else {
                    pipe.cmd("PEXPIRE").arg(&rkey).arg(ttl_millis(ttl)).ignore();
                }
                let (value,): (i64,) = self
                    .run(op, move |mut conn| async move { pipe.query_async(&mut conn).await })
                    .await?;
                Ok(value)
            }
        }
    }
}

/// SCAN the namespace and delete this backend's keys in batches
///
/// Keys belonging to namespaces nested under `prefix` match the glob
/// but are left alone.
async fn scan_and_delete(
    mut conn: ConnectionManager,
    prefix: String,
    step_timeout: Duration,
) -> Result<usize, CacheError> {
    let pattern = namespace_pattern(&prefix);
    let mut cursor: u64 = 0;
    let mut deleted = 0;
    loop {
        let mut scan = redis::cmd("SCAN");
        scan.arg(cursor)
            .arg("MATCH")
            .arg(&pattern)
            .arg("COUNT")
            .arg(REDIS_SCAN_COUNT);
        let (next, scanned): (u64, Vec<String>) =
            tokio::time::timeout(step_timeout, scan.query_async(&mut conn))
                .await
                .map_err(|_| CacheError::Timeout("Redis SCAN timed out".to_string()))??;
        let keys: Vec<String> = scanned
            .into_iter()
            .filter(|key| is_own_key(&prefix, key))
            .collect();

        if !keys.is_empty() {
            let mut del = redis::cmd("DEL");
            del.arg(&keys);
            let removed: usize = tokio::time::timeout(step_timeout, del.query_async(&mut conn))
                .await
                .map_err(|_| CacheError::Timeout("Redis DEL timed out".to_string()))??;
            deleted += removed;
        }

        cursor = next;
        if cursor == 0 {
            return Ok(deleted);
        }
    }
}

#[async_trait]
impl AsyncCacheBackend for RedisBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let rkey = self.redis_key(key)?;
        let raw: Option<Vec<u8>> = self
            .run(CacheOperation::Get, move |mut conn| async move {
                redis::cmd("GET").arg(&rkey).query_async(&mut conn).await
            })
            .await?;
        self.decode(raw)
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let rkey = self.redis_key(key)?;
        if is_immediate_expiry(ttl) {
            let _: i64 = self
                .run(CacheOperation::Set, move |mut conn| async move {
                    redis::cmd("DEL").arg(&rkey).query_async(&mut conn).await
                })
                .await?;
            return Ok(());
        }

        let payload = self.encode(&value)?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(&rkey).arg(&payload[..]);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = self
            .run(CacheOperation::Set, move |mut conn| async move {
                cmd.query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let rkey = self.redis_key(key)?;
        let removed: i64 = self
            .run(CacheOperation::Delete, move |mut conn| async move {
                redis::cmd("DEL").arg(&rkey).query_async(&mut conn).await
            })
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let rkey = self.redis_key(key)?;
        let count: i64 = self
            .run(CacheOperation::Exists, move |mut conn| async move {
                redis::cmd("EXISTS").arg(&rkey).query_async(&mut conn).await
            })
            .await?;
        Ok(count > 0)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let conn = self.connection().await?;
        let prefix = self.key_prefix.clone();
        // Runs to completion even if the caller stops waiting
        let task = bridge_handle()?.spawn(scan_and_delete(conn, prefix, self.operation_timeout));
        let deleted = task
            .await
            .map_err(|e| CacheError::Backend(format!("Redis clear task failed: {}", e)))??;
        tracing::debug!(backend = %self.name, deleted, "Cleared Redis namespace");
        Ok(())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let rkeys = self.redis_keys(keys)?;
        let raw: Vec<Option<Vec<u8>>> = self
            .run(CacheOperation::GetMany, move |mut conn| async move {
                redis::cmd("MGET").arg(&rkeys).query_async(&mut conn).await
            })
            .await?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, bytes) in keys.iter().zip(raw) {
            if let Some(value) = self.decode(bytes)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &entries {
            let rkey = self.redis_key(key)?;
            if is_immediate_expiry(ttl) {
                pipe.cmd("DEL").arg(rkey).ignore();
                continue;
            }
            let payload = self.encode(value)?;
            pipe.cmd("SET").arg(rkey).arg(&payload[..]);
            if let Some(ttl) = ttl {
                pipe.arg("PX").arg(ttl_millis(ttl));
            }
            pipe.ignore();
        }
        let _: () = self
            .run(CacheOperation::SetMany, move |mut conn| async move {
                pipe.query_async(&mut conn).await
            })
            .await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let rkeys = self.redis_keys(keys)?;
        let removed: usize = self
            .run(CacheOperation::DeleteMany, move |mut conn| async move {
                redis::cmd("DEL").arg(&rkeys).query_async(&mut conn).await
            })
            .await?;
        Ok(removed)
    }

    async fn incr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.adjust(CacheOperation::Incr, key, amount, ttl).await
    }

    async fn decr(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<i64, CacheError> {
        self.adjust(CacheOperation::Decr, key, amount, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        let rkey = self.redis_key(key)?;
        let millis: i64 = self
            .run(CacheOperation::Ttl, move |mut conn| async move {
                redis::cmd("PTTL").arg(&rkey).query_async(&mut conn).await
            })
            .await?;
        Ok(match millis {
            -2 => KeyTtl::Missing,
            -1 => KeyTtl::Persistent,
            ms => KeyTtl::Remaining(Duration::from_millis(ms.max(0) as u64)),
        })
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let rkey = self.redis_key(key)?;
        let affected: i64 = if ttl.is_zero() {
            self.run(CacheOperation::Touch, move |mut conn| async move {
                redis::cmd("DEL").arg(&rkey).query_async(&mut conn).await
            })
            .await?
        } else {
            let millis = ttl_millis(ttl);
            self.run(CacheOperation::Touch, move |mut conn| async move {
                redis::cmd("PEXPIRE")
                    .arg(&rkey)
                    .arg(millis)
                    .query_async(&mut conn)
                    .await
            })
            .await?
        };
        Ok(affected > 0)
    }

    async fn is_healthy(&self) -> bool {
        let pong: Result<String, CacheError> = self
            .run(CacheOperation::Health, |mut conn| async move {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await;
        match pong {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(backend = %self.name, error = %e, "Redis health check failed");
                false
            }
        }
    }

    async fn close(&self) -> Result<(), CacheError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.connection.lock().await.take();
            tracing::debug!(backend = %self.name, "Redis backend closed");
        }
        Ok(())
    }
}

// Verify Send + Sync bounds (required for async trait)
fn _assert_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    assert_send::<RedisBackend>();
    assert_sync::<RedisBackend>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::SerializerKind;
    use serde_json::json;

    fn unreachable() -> RedisBackendConfig {
        RedisBackendConfig {
            connection_timeout_ms: 300,
            operation_timeout_ms: 300,
            ..RedisBackendConfig::new("offline", "redis://127.0.0.1:1/0")
        }
    }

    #[test]
    fn test_rejects_missing_url() {
        let config = RedisBackendConfig {
            url: None,
            ..RedisBackendConfig::new("r", "redis://localhost")
        };
        assert!(matches!(
            RedisBackend::new(&config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_rejects_non_redis_scheme() {
        let config = RedisBackendConfig::new("r", "http://localhost:6379");
        assert!(matches!(
            RedisBackend::new(&config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_construction_does_not_connect() {
        let backend = RedisBackend::new(&unreachable()).unwrap();
        assert_eq!(backend.name(), "offline");
        assert_eq!(backend.kind(), BackendKind::Redis);
        assert_eq!(backend.key_prefix(), "kura:offline");
    }

    #[test]
    fn test_custom_prefix_is_used_for_keys() {
        let config = RedisBackendConfig {
            key_prefix: Some("shop:".to_string()),
            ..RedisBackendConfig::new("r", "redis://localhost")
        };
        let backend = RedisBackend::new(&config).unwrap();
        assert_eq!(backend.redis_key("cart 1").unwrap(), "shop:cart%201");
    }

    #[rstest::rstest]
    #[case::json(SerializerKind::Json)]
    #[case::messagepack(SerializerKind::MessagePack)]
    #[case::text(SerializerKind::Text)]
    fn test_integers_are_stored_natively_for_every_codec(#[case] serializer: SerializerKind) {
        let config = RedisBackendConfig {
            serializer,
            ..unreachable()
        };
        let backend = RedisBackend::new(&config).unwrap();

        // What INCRBY accepts and produces
        assert_eq!(&backend.encode(&json!(41)).unwrap()[..], b"41");
        assert_eq!(&backend.encode(&json!(-7)).unwrap()[..], b"-7");
        assert_eq!(backend.decode(Some(b"42".to_vec())).unwrap(), Some(json!(42)));

        // Non-integers still go through the codec; text is lossy by nature
        if serializer != SerializerKind::Text {
            for value in [json!("41"), json!(4.5), json!({"a": [1, 2]}), json!(null)] {
                let raw = backend.encode(&value).unwrap().to_vec();
                assert_eq!(backend.decode(Some(raw)).unwrap(), Some(value));
            }
        }
        assert_eq!(backend.decode(None).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let backend = RedisBackend::new(&unreachable()).unwrap();
        let err = backend.get("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Connection(_)), "got {:?}", err);
        assert!(err.is_retryable());
        assert!(!backend.is_healthy().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = RedisBackend::new(&unreachable()).unwrap();
        backend.close().await.unwrap();
        backend.close().await.unwrap();
        assert!(matches!(
            backend.get("k").await,
            Err(CacheError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_bulk_operations_skip_the_server() {
        let backend = RedisBackend::new(&unreachable()).unwrap();
        assert!(backend.get_many(&[]).await.unwrap().is_empty());
        assert_eq!(backend.delete_many(&[]).await.unwrap(), 0);
        backend.set_many(HashMap::new(), None).await.unwrap();
    }
}
