//! File-per-entry cache backend
//!
//! Each key lives in `root/<shard>/<sha256>.entry` (see `types` for the
//! layout). Writes go to a unique temp file that is renamed over the entry,
//! so readers never observe a partial write. A striped lock keyed by the
//! hash serializes operations on the same key inside this process.
//!
//! With `max_entries` set, the backend keeps a running count of entry
//! files so writes under the bound never touch the directory listing.
//!
//! Limitations: the stripes and the entry count are process-local. `incr`
//! and `decr` from two processes sharing a directory are not atomic with
//! respect to each other, and files written by another process are only
//! counted once this process next rescans while over its bound.

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::codec::{default_serializer, ValueCodec};
use crate::cache::config::FileBackendConfig;
use crate::cache::entry::KeyTtl;
use crate::cache::error::CacheError;
use crate::cache::traits::{BackendKind, CacheBackend};
use crate::cache::utils::{
    apply_delta, coerce_counter, compute_expiry, is_expired, is_immediate_expiry, remaining_ttl,
};
use crate::constants::{ENTRY_FILE_EXTENSION, FILE_LOCK_STRIPES};

use super::locks::StripedLocks;
use super::types::{decode_entry, encode_entry, expiry_micros, EntryHeader};
use super::utils::{entry_path, is_cache_file, is_shard_dir, key_to_hash, shard_dir, temp_path};

/// Live entry read from disk, payload still encoded
struct StoredEntry {
    header: EntryHeader,
    payload: Vec<u8>,
}

pub struct FileBackend {
    name: String,
    root: PathBuf,
    codec: Arc<dyn ValueCodec>,
    max_entries: Option<usize>,
    // Entry files this process knows about, seeded by a scan when bounded
    entry_count: AtomicUsize,
    locks: StripedLocks,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl FileBackend {
    pub fn new(config: &FileBackendConfig) -> Result<Self, CacheError> {
        Self::with_parts(
            config,
            default_serializer(config.serializer),
            Arc::new(SystemClock),
        )
    }

    /// Build with an explicit codec and clock
    pub fn with_parts(
        config: &FileBackendConfig,
        codec: Arc<dyn ValueCodec>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CacheError> {
        config.validate().map_err(|e| {
            CacheError::Configuration(format!("file backend '{}': {}", config.name, e))
        })?;
        let root = config.directory.clone().ok_or_else(|| {
            CacheError::Configuration(format!("file backend '{}' has no directory", config.name))
        })?;

        if !root.exists() {
            if !config.create_dir {
                return Err(CacheError::Configuration(format!(
                    "cache directory {} does not exist and create_dir is false",
                    root.display()
                )));
            }
            fs::create_dir_all(&root).map_err(|e| {
                CacheError::Configuration(format!(
                    "cannot create cache directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
        } else if !root.is_dir() {
            return Err(CacheError::Configuration(format!(
                "cache path {} is not a directory",
                root.display()
            )));
        }

        tracing::debug!(
            backend = %config.name,
            directory = %root.display(),
            serializer = codec.name(),
            "File backend ready"
        );

        let backend = Self {
            name: config.name.clone(),
            root,
            codec,
            max_entries: config.max_entries,
            entry_count: AtomicUsize::new(0),
            locks: StripedLocks::new(FILE_LOCK_STRIPES),
            clock,
            closed: AtomicBool::new(false),
        };
        if backend.max_entries.is_some() {
            let existing = backend.entry_files()?.len();
            backend.entry_count.store(existing, Ordering::Release);
        }
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed(format!(
                "file backend '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }

    /// Remove an entry file, keeping the entry count in step
    fn remove_entry(&self, path: &Path) -> Result<bool, CacheError> {
        let removed = remove_if_present(path)?;
        if removed {
            self.forget_entries(1);
        }
        Ok(removed)
    }

    fn forget_entries(&self, n: usize) {
        // Saturates: another process may have removed files we never counted.
        // The closure never returns None, so the update cannot fail.
        self.entry_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(n))
            })
            .ok();
    }

    /// Read the live entry for `key`; expired entries are removed on sight.
    /// Caller must hold the key's stripe.
    fn read_live(&self, key: &str, hash: &str) -> Result<Option<StoredEntry>, CacheError> {
        let path = entry_path(&self.root, hash);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (header, payload) = decode_entry(&raw)?;

        // A different key with the same digest is treated as absent
        if header.key != key {
            return Ok(None);
        }
        if is_expired(self.clock.as_ref(), header.expires_at()) {
            self.remove_entry(&path)?;
            return Ok(None);
        }
        Ok(Some(StoredEntry {
            payload: payload.to_vec(),
            header,
        }))
    }

    /// Atomically replace the entry file. Caller must hold the key's stripe.
    fn write_raw(&self, hash: &str, header: &EntryHeader, payload: &[u8]) -> Result<(), CacheError> {
        let bytes = encode_entry(header, payload)?;
        fs::create_dir_all(shard_dir(&self.root, hash))?;

        let tmp = temp_path(&self.root, hash);
        let target = entry_path(&self.root, hash);
        let replacing = target.exists();
        let written = fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(&bytes)?;
            file.flush()
        });
        let result = written.and_then(|_| fs::rename(&tmp, &target));
        if let Err(e) = result {
            if let Err(cleanup) = remove_if_present(&tmp) {
                tracing::warn!(backend = %self.name, error = %cleanup, "Failed to remove temp file");
            }
            return Err(e.into());
        }
        if !replacing {
            self.entry_count.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Store a value; a zero TTL removes the entry instead. Caller must hold the stripe.
    fn write_value(
        &self,
        key: &str,
        hash: &str,
        value: &Value,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        if is_immediate_expiry(ttl) {
            self.remove_entry(&entry_path(&self.root, hash))?;
            return Ok(());
        }
        let expires_at = compute_expiry(self.clock.as_ref(), ttl);
        self.write_with_expiry(key, hash, value, expires_at)
    }

    fn write_with_expiry(
        &self,
        key: &str,
        hash: &str,
        value: &Value,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), CacheError> {
        let payload = self.codec.encode(value)?;
        let header = EntryHeader::new(key, self.clock.now(), expires_at);
        self.write_raw(hash, &header, &payload)
    }

    fn adjust(&self, key: &str, delta: i128, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        let updated = {
            let _guard = self.locks.lock(&hash);
            let (current, kept_expiry) = match self.read_live(key, &hash)? {
                Some(stored) => {
                    let value = self.codec.decode(&stored.payload)?;
                    (coerce_counter(key, &value)?, stored.header.expires_at())
                }
                None => (0, None),
            };
            let updated = apply_delta(key, current, delta)?;

            if is_immediate_expiry(ttl) {
                self.remove_entry(&entry_path(&self.root, &hash))?;
                return Ok(updated);
            }
            let expires_at = match ttl {
                Some(_) => compute_expiry(self.clock.as_ref(), ttl),
                None => kept_expiry,
            };
            self.write_with_expiry(key, &hash, &Value::from(updated), expires_at)?;
            updated
        };
        self.enforce_capacity(&hash)?;
        Ok(updated)
    }

    /// Every `.entry` file under the shard directories
    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() || !is_shard_dir(&shard) {
                continue;
            }
            for file in fs::read_dir(&shard)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) == Some(ENTRY_FILE_EXTENSION) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }

    /// Evict the oldest-written entry files beyond `max_entries`, never `keep`
    ///
    /// The directory is only listed once the tracked count exceeds the
    /// bound; the listing then replaces the count.
    fn enforce_capacity(&self, keep: &str) -> Result<usize, CacheError> {
        let max = match self.max_entries {
            Some(max) => max,
            None => return Ok(0),
        };
        if self.entry_count.load(Ordering::Acquire) <= max {
            return Ok(0);
        }
        let files = self.entry_files()?;
        let total = files.len();
        self.entry_count.store(total, Ordering::Release);
        if total <= max {
            return Ok(0);
        }

        let keep_path = entry_path(&self.root, keep);
        let mut candidates: Vec<(SystemTime, PathBuf)> = files
            .into_iter()
            .filter(|p| *p != keep_path)
            .filter_map(|p| {
                let modified = fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((modified, p))
            })
            .collect();
        candidates.sort();

        let excess = total - max;
        let mut evicted = 0;
        for (_, path) in candidates.into_iter().take(excess) {
            if self.remove_entry(&path)? {
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(backend = %self.name, evicted, "Evicted file cache entries");
        }
        Ok(evicted)
    }

    /// Delete expired entry files now instead of waiting for reads
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        self.ensure_open()?;
        let mut purged = 0;
        for path in self.entry_files()? {
            let hash = match path.file_stem().and_then(|s| s.to_str()) {
                Some(hash) => hash.to_string(),
                None => continue,
            };
            let _guard = self.locks.lock(&hash);
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            // Corrupt files are left for get to report
            if let Ok((header, _)) = decode_entry(&raw) {
                if is_expired(self.clock.as_ref(), header.expires_at()) && self.remove_entry(&path)? {
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }

    /// Number of entry files on disk, including expired ones not yet purged
    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entry_files()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Entry files counted without listing the directory
    pub fn tracked_len(&self) -> usize {
        self.entry_count.load(Ordering::Acquire)
    }
}

fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        let _guard = self.locks.lock(&hash);
        match self.read_live(key, &hash)? {
            Some(stored) => Ok(Some(self.codec.decode(&stored.payload)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        {
            let _guard = self.locks.lock(&hash);
            self.write_value(key, &hash, &value, ttl)?;
        }
        self.enforce_capacity(&hash)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        let _guard = self.locks.lock(&hash);
        if self.read_live(key, &hash)?.is_none() {
            return Ok(false);
        }
        self.remove_entry(&entry_path(&self.root, &hash))
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        let _guard = self.locks.lock(&hash);
        Ok(self.read_live(key, &hash)?.is_some())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        let _guards = self.locks.lock_all();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() || !is_shard_dir(&shard) {
                continue;
            }
            for file in fs::read_dir(&shard)? {
                let path = file?.path();
                if is_cache_file(&path) {
                    remove_if_present(&path)?;
                }
            }
        }
        self.entry_count.store(0, Ordering::Release);
        Ok(())
    }

    fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.set(&key, value, ttl)?;
        }
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn incr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.adjust(key, amount as i128, ttl)
    }

    fn decr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.adjust(key, -(amount as i128), ttl)
    }

    fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        let _guard = self.locks.lock(&hash);
        Ok(match self.read_live(key, &hash)? {
            Some(stored) => match remaining_ttl(self.clock.as_ref(), stored.header.expires_at()) {
                Some(left) => KeyTtl::Remaining(left),
                None => KeyTtl::Persistent,
            },
            None => KeyTtl::Missing,
        })
    }

    fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.ensure_open()?;
        let hash = key_to_hash(key);
        let _guard = self.locks.lock(&hash);
        let stored = match self.read_live(key, &hash)? {
            Some(stored) => stored,
            None => return Ok(false),
        };
        if ttl.is_zero() {
            self.remove_entry(&entry_path(&self.root, &hash))?;
            return Ok(true);
        }
        let header = EntryHeader {
            expires_at_us: compute_expiry(self.clock.as_ref(), Some(ttl)).map(expiry_micros),
            ..stored.header
        };
        self.write_raw(&hash, &header, &stored.payload)?;
        Ok(true)
    }

    fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.root.is_dir()
    }

    fn close(&self) -> Result<(), CacheError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(backend = %self.name, "File backend closed");
        }
        Ok(())
    }
}
