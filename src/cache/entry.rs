//! Cache entry and TTL result types

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::clock::Clock;
use super::utils::{is_expired, remaining_ttl};

/// A cached value together with its absolute expiry
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The cached value; `Value::Null` is a stored null, not a miss
    pub value: Value,
    /// When this entry expires; `None` means never
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(value: Value, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, clock: &dyn Clock) -> bool {
        is_expired(clock, self.expires_at)
    }

    pub fn ttl(&self, clock: &dyn Clock) -> KeyTtl {
        match remaining_ttl(clock, self.expires_at) {
            Some(left) => KeyTtl::Remaining(left),
            None => KeyTtl::Persistent,
        }
    }
}

/// Outcome of a TTL lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist (or already expired)
    Missing,
    /// Key exists and never expires
    Persistent,
    /// Key exists and expires after the given duration
    Remaining(Duration),
}

impl KeyTtl {
    pub fn exists(&self) -> bool {
        !matches!(self, KeyTtl::Missing)
    }

    /// Remaining lifetime, `None` for persistent or missing keys
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Remaining(d) => Some(*d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::utils::compute_expiry;
    use serde_json::json;

    #[test]
    fn test_entry_without_expiry_is_persistent() {
        let clock = ManualClock::frozen_now();
        let entry = CacheEntry::new(json!("v"), None);
        assert!(!entry.is_expired(&clock));
        assert_eq!(entry.ttl(&clock), KeyTtl::Persistent);
    }

    #[test]
    fn test_entry_ttl_counts_down() {
        let clock = ManualClock::frozen_now();
        let entry = CacheEntry::new(
            json!(1),
            compute_expiry(&clock, Some(Duration::from_secs(10))),
        );
        clock.advance(Duration::from_secs(4));
        assert_eq!(entry.ttl(&clock), KeyTtl::Remaining(Duration::from_secs(6)));
        clock.advance(Duration::from_secs(6));
        assert!(entry.is_expired(&clock));
    }

    #[test]
    fn test_key_ttl_helpers() {
        assert!(!KeyTtl::Missing.exists());
        assert!(KeyTtl::Persistent.exists());
        assert_eq!(KeyTtl::Persistent.remaining(), None);
        assert_eq!(
            KeyTtl::Remaining(Duration::from_secs(2)).remaining(),
            Some(Duration::from_secs(2))
        );
    }
}
