//! Striped per-key locks
//!
//! A fixed array of mutexes indexed by the key hash. Operations on the same
//! key always take the same stripe, which serializes read-modify-write
//! sequences such as `incr` within one process.

use parking_lot::{Mutex, MutexGuard};

pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    pub fn new(count: usize) -> Self {
        let count = count.max(1);
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    fn index(&self, hash: &str) -> usize {
        // Hex prefix of the SHA256 is uniformly distributed
        let prefix = hash.get(..8).unwrap_or(hash);
        let n = u32::from_str_radix(prefix, 16).unwrap_or(0) as usize;
        n % self.stripes.len()
    }

    pub fn lock(&self, hash: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.index(hash)].lock()
    }

    /// Hold every stripe, used by whole-directory operations
    pub fn lock_all(&self) -> Vec<MutexGuard<'_, ()>> {
        self.stripes.iter().map(|m| m.lock()).collect()
    }
}
