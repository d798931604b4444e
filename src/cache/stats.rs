//! Cache statistics types
//!
//! This module provides structures for tracking cache activity:
//! - `CacheStats`: Point-in-time counters for one backend
//! - `StatsTracker`: Lock-free counters updated by the manager
//! - `BackendStats`: Per-backend snapshots with aggregation

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Successful writes (set, set_many entries, incr, decr, touch)
    pub sets: u64,
    /// Entries removed by delete or delete_many
    pub deletes: u64,
    /// Operations that returned an error
    pub errors: u64,
}

impl CacheStats {
    /// Calculate hit rate (hits / total lookups)
    /// Returns 0.0 if there are no lookups
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Atomic counters behind a `CacheStats` snapshot
#[derive(Debug, Default)]
pub struct StatsTracker {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hits(&self, count: u64) {
        self.hits.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_misses(&self, count: u64) {
        self.misses.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_sets(&self, count: u64) {
        self.sets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-backend statistics snapshots
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStats {
    stats: HashMap<String, CacheStats>,
}

impl BackendStats {
    pub fn new() -> Self {
        Self {
            stats: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn set(&mut self, backend: String, stats: CacheStats) {
        self.stats.insert(backend, stats);
    }

    /// Returns None if the backend is not known
    pub fn get(&self, backend: &str) -> Option<&CacheStats> {
        self.stats.get(backend)
    }

    pub fn backends(&self) -> impl Iterator<Item = &str> {
        self.stats.keys().map(String::as_str)
    }

    /// Sum of every backend's counters
    pub fn aggregate(&self) -> CacheStats {
        let mut aggregated = CacheStats::default();
        for stats in self.stats.values() {
            aggregated.hits += stats.hits;
            aggregated.misses += stats.misses;
            aggregated.sets += stats.sets;
            aggregated.deletes += stats.deletes;
            aggregated.errors += stats.errors;
        }
        aggregated
    }
}
