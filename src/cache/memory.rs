//! Memory cache implementation
//!
//! Process-local map guarded by a single mutex. Every operation holds the
//! lock for its whole critical section, which is what makes `incr`/`decr`
//! atomic. Expired entries are purged lazily when a read finds them.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::config::MemoryBackendConfig;
use super::entry::{CacheEntry, KeyTtl};
use super::error::CacheError;
use super::traits::{BackendKind, CacheBackend};
use super::utils::{apply_delta, coerce_counter, compute_expiry, is_immediate_expiry};

struct Slot {
    entry: CacheEntry,
    // Monotonic write sequence, smallest is the least recently written
    written: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Slot>,
    next_seq: u64,
}

impl MemoryState {
    /// Live entry for `key`, purging it first if expired
    fn live(&mut self, key: &str, clock: &dyn Clock) -> Option<&mut Slot> {
        let expired = match self.entries.get(key) {
            Some(slot) => slot.entry.is_expired(clock),
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: &str, entry: CacheEntry) {
        self.next_seq += 1;
        let written = self.next_seq;
        self.entries.insert(key.to_string(), Slot { entry, written });
    }

    fn purge_expired(&mut self, clock: &dyn Clock) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.entry.is_expired(clock));
        before - self.entries.len()
    }

    /// Bring the map back under `max_entries`, expired entries first
    fn enforce_capacity(&mut self, max_entries: usize, clock: &dyn Clock) -> usize {
        if self.entries.len() <= max_entries {
            return 0;
        }
        let mut evicted = self.purge_expired(clock);
        while self.entries.len() > max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.written)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

/// In-process cache backend
pub struct MemoryBackend {
    name: String,
    // None once closed
    state: Mutex<Option<MemoryState>>,
    max_entries: Option<usize>,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    /// Create a new MemoryBackend from configuration
    pub fn new(config: &MemoryBackendConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &MemoryBackendConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: config.name.clone(),
            state: Mutex::new(Some(MemoryState::default())),
            max_entries: config.max_entries,
            clock,
        }
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut MemoryState, &dyn Clock) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(state) => f(state, self.clock.as_ref()),
            None => Err(CacheError::Closed(format!(
                "memory backend '{}' is closed",
                self.name
            ))),
        }
    }

    fn store(&self, state: &mut MemoryState, key: &str, value: Value, ttl: Option<Duration>) {
        if is_immediate_expiry(ttl) {
            state.entries.remove(key);
            return;
        }
        let expires_at = compute_expiry(self.clock.as_ref(), ttl);
        state.insert(key, CacheEntry::new(value, expires_at));
        self.enforce_bound(state);
    }

    /// Apply `max_entries` after any insert
    fn enforce_bound(&self, state: &mut MemoryState) {
        if let Some(max) = self.max_entries {
            let evicted = state.enforce_capacity(max, self.clock.as_ref());
            if evicted > 0 {
                tracing::debug!(backend = %self.name, evicted, "Evicted memory cache entries");
            }
        }
    }

    fn adjust(&self, key: &str, delta: i128, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.with_state(|state, clock| {
            let (current, kept_expiry) = match state.live(key, clock) {
                Some(slot) => (
                    coerce_counter(key, &slot.entry.value)?,
                    slot.entry.expires_at,
                ),
                None => (0, None),
            };
            let updated = apply_delta(key, current, delta)?;

            if is_immediate_expiry(ttl) {
                state.entries.remove(key);
                return Ok(updated);
            }
            let expires_at = match ttl {
                Some(_) => compute_expiry(clock, ttl),
                None => kept_expiry,
            };
            state.insert(key, CacheEntry::new(Value::from(updated), expires_at));
            self.enforce_bound(state);
            Ok(updated)
        })
    }

    /// Remove every expired entry now instead of waiting for reads
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        self.with_state(|state, clock| Ok(state.purge_expired(clock)))
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .as_ref()
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        self.with_state(|state, clock| Ok(state.live(key, clock).map(|slot| slot.entry.value.clone())))
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.with_state(|state, _| {
            self.store(state, key, value, ttl);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.with_state(|state, clock| {
            let existed = state.live(key, clock).is_some();
            state.entries.remove(key);
            Ok(existed)
        })
    }

    fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.with_state(|state, clock| Ok(state.live(key, clock).is_some()))
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.with_state(|state, _| {
            state.entries.clear();
            Ok(())
        })
    }

    fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, CacheError> {
        self.with_state(|state, clock| {
            let mut found = HashMap::with_capacity(keys.len());
            for key in keys {
                if let Some(slot) = state.live(key, clock) {
                    found.insert(key.clone(), slot.entry.value.clone());
                }
            }
            Ok(found)
        })
    }

    fn set_many(
        &self,
        entries: HashMap<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.with_state(|state, _| {
            for (key, value) in entries {
                self.store(state, &key, value, ttl);
            }
            Ok(())
        })
    }

    fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        self.with_state(|state, clock| {
            let mut removed = 0;
            for key in keys {
                if state.live(key, clock).is_some() {
                    state.entries.remove(key);
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn incr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.adjust(key, amount as i128, ttl)
    }

    fn decr(&self, key: &str, amount: u64, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.adjust(key, -(amount as i128), ttl)
    }

    fn ttl(&self, key: &str) -> Result<KeyTtl, CacheError> {
        self.with_state(|state, clock| {
            Ok(match state.live(key, clock) {
                Some(slot) => slot.entry.ttl(clock),
                None => KeyTtl::Missing,
            })
        })
    }

    fn touch(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.with_state(|state, clock| {
            if state.live(key, clock).is_none() {
                return Ok(false);
            }
            if ttl.is_zero() {
                state.entries.remove(key);
            } else if let Some(slot) = state.entries.get_mut(key) {
                slot.entry.expires_at = compute_expiry(clock, Some(ttl));
            }
            Ok(true)
        })
    }

    fn is_healthy(&self) -> bool {
        self.state.lock().is_some()
    }

    fn close(&self) -> Result<(), CacheError> {
        if self.state.lock().take().is_some() {
            tracing::debug!(backend = %self.name, "Memory backend closed");
        }
        Ok(())
    }
}
