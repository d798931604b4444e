//! Tests for the file backend

#[cfg(test)]
mod tests {
    use super::super::utils::{entry_path, key_to_hash};
    use super::super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::codec::{default_serializer, SerializerKind, TextCodec};
    use crate::cache::config::FileBackendConfig;
    use crate::cache::entry::KeyTtl;
    use crate::cache::error::CacheError;
    use crate::cache::traits::{BackendKind, CacheBackend};
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        ))
    }

    fn backend_in(dir: &TempDir) -> (FileBackend, Arc<ManualClock>) {
        let clock = clock();
        let config = FileBackendConfig::new("files", dir.path());
        let backend = FileBackend::with_parts(
            &config,
            default_serializer(SerializerKind::Json),
            clock.clone(),
        )
        .unwrap();
        (backend, clock)
    }

    // Construction

    #[test]
    fn test_creates_missing_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        let backend = FileBackend::new(&FileBackendConfig::new("f", &nested)).unwrap();
        assert!(nested.is_dir());
        assert_eq!(backend.root(), nested.as_path());
        assert_eq!(backend.kind(), BackendKind::File);
    }

    #[test]
    fn test_missing_directory_without_create_dir_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let config = FileBackendConfig {
            create_dir: false,
            ..FileBackendConfig::new("f", temp.path().join("absent"))
        };
        assert!(matches!(
            FileBackend::new(&config),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_directory_that_is_a_file_is_configuration_error() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            FileBackend::new(&FileBackendConfig::new("f", &file)),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_no_directory_is_configuration_error() {
        let config = FileBackendConfig {
            directory: None,
            ..FileBackendConfig::new("f", "/unused")
        };
        assert!(matches!(
            FileBackend::new(&config),
            Err(CacheError::Configuration(_))
        ));
    }

    // Basic operations

    #[test]
    fn test_set_get_delete() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);

        cache.set("user:1", json!({"name": "ada"}), None).unwrap();
        assert_eq!(cache.get("user:1").unwrap(), Some(json!({"name": "ada"})));
        assert!(cache.exists("user:1").unwrap());

        assert!(cache.delete("user:1").unwrap());
        assert!(!cache.delete("user:1").unwrap());
        assert_eq!(cache.get("user:1").unwrap(), None);
    }

    #[test]
    fn test_entry_is_written_to_sharded_path() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("k", json!(1), None).unwrap();

        let path = entry_path(temp.path(), &key_to_hash("k"));
        assert!(path.is_file());
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_no_temp_files_left_after_writes() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        for i in 0..20 {
            cache.set(&format!("k{}", i), json!(i), None).unwrap();
        }
        let leftovers = walk(temp.path())
            .into_iter()
            .filter(|p| p.extension().map(|e| e == "tmp").unwrap_or(false))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_stored_null_is_not_a_miss() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("n", Value::Null, None).unwrap();
        assert_eq!(cache.get("n").unwrap(), Some(Value::Null));
        assert!(cache.exists("n").unwrap());
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("k", json!("one"), None).unwrap();
        cache.set("k", json!("two"), None).unwrap();
        assert_eq!(cache.get("k").unwrap(), Some(json!("two")));
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_values_survive_a_new_backend_instance() {
        let temp = TempDir::new().unwrap();
        {
            let (cache, _) = backend_in(&temp);
            cache.set("persist", json!([1, 2, 3]), None).unwrap();
        }
        let (reopened, _) = backend_in(&temp);
        assert_eq!(reopened.get("persist").unwrap(), Some(json!([1, 2, 3])));
    }

    // Expiry

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let temp = TempDir::new().unwrap();
        let (cache, clock) = backend_in(&temp);
        cache
            .set("short", json!("v"), Some(Duration::from_secs(5)))
            .unwrap();
        assert!(cache.exists("short").unwrap());

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get("short").unwrap(), None);
        assert!(!entry_path(temp.path(), &key_to_hash("short")).exists());
    }

    #[test]
    fn test_sub_millisecond_clock_keeps_exact_expiry() {
        let temp = TempDir::new().unwrap();
        let (cache, clock) = backend_in(&temp);
        clock.set(Utc.timestamp_micros(1_700_000_000_000_600).unwrap());

        cache
            .set("tiny", json!("v"), Some(Duration::from_micros(300)))
            .unwrap();
        assert_eq!(cache.get("tiny").unwrap(), Some(json!("v")));
        clock.advance(Duration::from_micros(300));
        assert_eq!(cache.get("tiny").unwrap(), None);

        cache
            .set("k", json!(1), Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(
            cache.ttl("k").unwrap(),
            KeyTtl::Remaining(Duration::from_millis(10))
        );
    }

    #[test]
    fn test_zero_ttl_stores_nothing_and_removes_existing() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("k", json!(1), None).unwrap();
        cache.set("k", json!(2), Some(Duration::ZERO)).unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
        assert_eq!(cache.len().unwrap(), 0);
    }

    #[test]
    fn test_ttl_and_touch() {
        let temp = TempDir::new().unwrap();
        let (cache, clock) = backend_in(&temp);
        cache
            .set("k", json!("v"), Some(Duration::from_secs(10)))
            .unwrap();
        clock.advance(Duration::from_secs(3));
        assert_eq!(
            cache.ttl("k").unwrap(),
            KeyTtl::Remaining(Duration::from_secs(7))
        );

        assert!(cache.touch("k", Duration::from_secs(60)).unwrap());
        assert_eq!(
            cache.ttl("k").unwrap(),
            KeyTtl::Remaining(Duration::from_secs(60))
        );
        assert_eq!(cache.get("k").unwrap(), Some(json!("v")));

        cache.set("p", json!(1), None).unwrap();
        assert_eq!(cache.ttl("p").unwrap(), KeyTtl::Persistent);
        assert_eq!(cache.ttl("absent").unwrap(), KeyTtl::Missing);
        assert!(!cache.touch("absent", Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_touch_with_zero_removes() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("k", json!(1), None).unwrap();
        assert!(cache.touch("k", Duration::ZERO).unwrap());
        assert!(!cache.exists("k").unwrap());
    }

    #[test]
    fn test_purge_expired() {
        let temp = TempDir::new().unwrap();
        let (cache, clock) = backend_in(&temp);
        cache.set("a", json!(1), Some(Duration::from_secs(1))).unwrap();
        cache.set("b", json!(2), Some(Duration::from_secs(1))).unwrap();
        cache.set("c", json!(3), None).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired().unwrap(), 2);
        assert_eq!(cache.len().unwrap(), 1);
    }

    // Counters

    #[test]
    fn test_incr_decr() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        assert_eq!(cache.incr("hits", 1, None).unwrap(), 1);
        assert_eq!(cache.incr("hits", 4, None).unwrap(), 5);
        assert_eq!(cache.decr("hits", 2, None).unwrap(), 3);
        assert_eq!(cache.get("hits").unwrap(), Some(json!(3)));
        assert_eq!(cache.decr("fresh", 2, None).unwrap(), -2);
    }

    #[test]
    fn test_incr_on_non_numeric_is_backend_error() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("name", json!("ada"), None).unwrap();
        assert!(matches!(
            cache.incr("name", 1, None),
            Err(CacheError::Backend(_))
        ));
        assert_eq!(cache.get("name").unwrap(), Some(json!("ada")));
    }

    #[test]
    fn test_incr_ttl_policy() {
        let temp = TempDir::new().unwrap();
        let (cache, clock) = backend_in(&temp);
        cache
            .incr("c", 1, Some(Duration::from_secs(10)))
            .unwrap();
        clock.advance(Duration::from_secs(4));

        cache.incr("c", 1, None).unwrap();
        assert_eq!(
            cache.ttl("c").unwrap(),
            KeyTtl::Remaining(Duration::from_secs(6))
        );

        cache
            .incr("c", 1, Some(Duration::from_secs(30)))
            .unwrap();
        assert_eq!(
            cache.ttl("c").unwrap(),
            KeyTtl::Remaining(Duration::from_secs(30))
        );
        assert_eq!(cache.get("c").unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_incr_with_text_codec() {
        let temp = TempDir::new().unwrap();
        let config = FileBackendConfig::new("txt", temp.path());
        let cache = FileBackend::with_parts(&config, Arc::new(TextCodec), clock()).unwrap();
        assert_eq!(cache.incr("n", 2, None).unwrap(), 2);
        assert_eq!(cache.incr("n", 2, None).unwrap(), 4);
        assert_eq!(cache.get("n").unwrap(), Some(json!(4)));
    }

    #[test]
    fn test_concurrent_increments_are_atomic() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(FileBackend::new(&FileBackendConfig::new("f", temp.path())).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        cache.incr("shared", 1, None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.get("shared").unwrap(), Some(json!(200)));
    }

    // Bulk operations

    #[test]
    fn test_bulk_operations() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), json!(1));
        entries.insert("b".to_string(), json!(2));
        cache.set_many(entries, None).unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "missing".to_string()];
        let found = cache.get_many(&keys).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"], json!(2));

        assert_eq!(cache.delete_many(&keys).unwrap(), 2);
        assert!(cache.get_many(&keys).unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_only_cache_files() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("a", json!(1), None).unwrap();
        cache.set("b", json!(2), None).unwrap();
        let foreign = temp.path().join("README");
        std::fs::write(&foreign, b"keep me").unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.len().unwrap(), 0);
        assert!(foreign.exists());
    }

    // Capacity

    #[test]
    fn test_max_entries_evicts_oldest_files() {
        let temp = TempDir::new().unwrap();
        let config = FileBackendConfig {
            max_entries: Some(3),
            ..FileBackendConfig::new("bounded", temp.path())
        };
        let cache = FileBackend::new(&config).unwrap();
        for i in 0..5 {
            cache.set(&format!("k{}", i), json!(i), None).unwrap();
            // Distinct modification times
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(cache.len().unwrap(), 3);
        assert_eq!(cache.get("k4").unwrap(), Some(json!(4)));
        assert_eq!(cache.get("k0").unwrap(), None);
    }

    #[test]
    fn test_entry_count_tracks_writes_without_listing() {
        let temp = TempDir::new().unwrap();
        let clock = clock();
        let config = FileBackendConfig {
            max_entries: Some(10),
            ..FileBackendConfig::new("bounded", temp.path())
        };
        let cache = FileBackend::with_parts(
            &config,
            default_serializer(SerializerKind::Json),
            clock.clone(),
        )
        .unwrap();

        cache.set("a", json!(1), None).unwrap();
        cache.set("a", json!(2), None).unwrap();
        cache.incr("b", 1, None).unwrap();
        cache
            .set("c", json!(3), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(cache.tracked_len(), 3);

        assert!(cache.touch("a", Duration::from_secs(60)).unwrap());
        assert!(cache.delete("b").unwrap());
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.get("c").unwrap(), None);
        assert_eq!(cache.tracked_len(), 1);
        assert_eq!(cache.len().unwrap(), 1);

        // A fresh instance seeds its count from the directory
        let reopened = FileBackend::new(&config).unwrap();
        assert_eq!(reopened.tracked_len(), 1);

        cache.clear().unwrap();
        assert_eq!(cache.tracked_len(), 0);
    }

    #[test]
    fn test_entry_count_resyncs_when_over_bound() {
        let temp = TempDir::new().unwrap();
        let config = FileBackendConfig {
            max_entries: Some(2),
            ..FileBackendConfig::new("bounded", temp.path())
        };
        let ours = FileBackend::new(&config).unwrap();
        let other = FileBackend::new(&FileBackendConfig::new("other", temp.path())).unwrap();

        ours.set("k0", json!(0), None).unwrap();
        other.set("x", json!("x"), None).unwrap();
        // Files from elsewhere stay uncounted while under the bound
        assert_eq!(ours.tracked_len(), 1);
        std::thread::sleep(Duration::from_millis(20));

        ours.set("k1", json!(1), None).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        ours.set("k2", json!(2), None).unwrap();
        assert_eq!(ours.len().unwrap(), 2);
        assert_eq!(ours.tracked_len(), 2);
        assert_eq!(ours.get("k2").unwrap(), Some(json!(2)));
    }

    // Corruption

    #[test]
    fn test_corrupt_file_is_backend_error() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        cache.set("k", json!("v"), None).unwrap();
        std::fs::write(entry_path(temp.path(), &key_to_hash("k")), b"garbage").unwrap();
        assert!(matches!(cache.get("k"), Err(CacheError::Backend(_))));
    }

    #[test]
    fn test_undecodable_payload_is_serialization_error() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        let header = EntryHeader {
            key: "k".to_string(),
            created_at_us: 0,
            expires_at_us: None,
        };
        let raw = super::super::types::encode_entry(&header, b"{not json").unwrap();
        let path = entry_path(temp.path(), &key_to_hash("k"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, raw).unwrap();
        assert!(matches!(cache.get("k"), Err(CacheError::Serialization(_))));
    }

    // Lifecycle

    #[test]
    fn test_close_is_idempotent_and_blocks_operations() {
        let temp = TempDir::new().unwrap();
        let (cache, _) = backend_in(&temp);
        assert!(cache.is_healthy());
        cache.close().unwrap();
        cache.close().unwrap();
        assert!(!cache.is_healthy());
        assert!(matches!(cache.get("k"), Err(CacheError::Closed(_))));
        assert!(matches!(
            cache.set("k", json!(1), None),
            Err(CacheError::Closed(_))
        ));
    }

    fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }
        out
    }
}
