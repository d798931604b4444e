//! Key and expiry helpers shared by every backend
//!
//! All TTL arithmetic goes through these functions so that expiry behaves
//! the same regardless of which backend holds an entry.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use super::clock::{Clock, SystemClock};
use super::error::CacheError;

/// Normalize a caller-supplied key
///
/// Surrounding whitespace is trimmed, control and zero-width characters are
/// removed anywhere in the key. Interior spaces are kept.
pub fn normalize_key(raw: &str) -> Result<String, CacheError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control() && !is_zero_width(*c))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(CacheError::InvalidKey(format!(
            "key {:?} is empty after normalization",
            raw
        )));
    }
    Ok(cleaned.to_string())
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

/// Current UTC instant from the system clock
pub fn now() -> DateTime<Utc> {
    SystemClock.now()
}

/// Absolute expiry for a relative TTL; `None` means the entry never expires
pub fn compute_expiry(clock: &dyn Clock, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.map(|ttl| {
        let delta = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        clock
            .now()
            .checked_add_signed(delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    })
}

/// Time left before `expiry`, clamped at zero
pub fn remaining_ttl(clock: &dyn Clock, expiry: Option<DateTime<Utc>>) -> Option<Duration> {
    expiry.map(|at| (at - clock.now()).to_std().unwrap_or(Duration::ZERO))
}

/// An entry is expired once its expiry instant is not in the future
pub fn is_expired(clock: &dyn Clock, expiry: Option<DateTime<Utc>>) -> bool {
    match expiry {
        Some(at) => at <= clock.now(),
        None => false,
    }
}

/// True when a TTL asks for an entry that is already expired
pub fn is_immediate_expiry(ttl: Option<Duration>) -> bool {
    matches!(ttl, Some(ttl) if ttl.is_zero())
}

/// Convert fractional seconds into a TTL
///
/// Zero, negative and NaN inputs all map to `Duration::ZERO` (already expired).
pub fn ttl_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::ZERO
    } else if secs.is_infinite() {
        Duration::MAX
    } else {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Read a stored value as an integer counter
///
/// Only integer JSON numbers count. Numeric strings and integral floats are
/// rejected so every backend, Redis included, applies the same rule.
pub fn coerce_counter(key: &str, value: &Value) -> Result<i64, CacheError> {
    value.as_i64().ok_or_else(|| {
        CacheError::Backend(format!("value stored at {:?} is not an integer", key))
    })
}

/// Apply a signed delta to a counter, failing on overflow
pub fn apply_delta(key: &str, current: i64, delta: i128) -> Result<i64, CacheError> {
    i64::try_from(current as i128 + delta)
        .map_err(|_| CacheError::Backend(format!("counter at {:?} would overflow", key)))
}

/// Millisecond count for Redis PX/PEXPIRE arguments, at least 1
pub fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use serde_json::json;

    #[test]
    fn test_normalize_key_trims_whitespace() {
        assert_eq!(normalize_key("  key \t ").unwrap(), "key");
        assert_eq!(normalize_key("user profile").unwrap(), "user profile");
    }

    #[test]
    fn test_normalize_key_strips_control_and_zero_width() {
        assert_eq!(normalize_key("a\n\tb\u{200b}").unwrap(), "ab");
        assert_eq!(normalize_key("\u{feff}session").unwrap(), "session");
    }

    #[test]
    fn test_normalize_key_empty_is_invalid() {
        assert!(matches!(normalize_key("   "), Err(CacheError::InvalidKey(_))));
        assert!(matches!(normalize_key(""), Err(CacheError::InvalidKey(_))));
        assert!(matches!(
            normalize_key("\u{200b}\n"),
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_compute_expiry_none_is_none() {
        let clock = ManualClock::frozen_now();
        assert_eq!(compute_expiry(&clock, None), None);
        assert_eq!(remaining_ttl(&clock, None), None);
    }

    #[test]
    fn test_compute_expiry_adds_ttl() {
        let clock = ManualClock::frozen_now();
        let expiry = compute_expiry(&clock, Some(Duration::from_millis(1500))).unwrap();
        assert_eq!(expiry - clock.now(), chrono::Duration::milliseconds(1500));
        assert_eq!(
            remaining_ttl(&clock, Some(expiry)),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_remaining_ttl_never_negative() {
        let clock = ManualClock::frozen_now();
        let expiry = compute_expiry(&clock, Some(Duration::from_secs(1)));
        clock.advance(Duration::from_secs(10));
        assert_eq!(remaining_ttl(&clock, expiry), Some(Duration::ZERO));
    }

    #[test]
    fn test_zero_ttl_is_expired_immediately() {
        let clock = ManualClock::frozen_now();
        let expiry = compute_expiry(&clock, Some(Duration::ZERO));
        assert!(is_expired(&clock, expiry));
        assert!(is_immediate_expiry(Some(Duration::ZERO)));
        assert!(!is_immediate_expiry(Some(Duration::from_millis(1))));
        assert!(!is_immediate_expiry(None));
    }

    #[test]
    fn test_is_expired_boundary() {
        let clock = ManualClock::frozen_now();
        let expiry = compute_expiry(&clock, Some(Duration::from_secs(5)));
        assert!(!is_expired(&clock, expiry));
        clock.advance(Duration::from_secs(5));
        assert!(is_expired(&clock, expiry));
        assert!(!is_expired(&clock, None));
    }

    #[test]
    fn test_ttl_from_secs_clamps() {
        assert_eq!(ttl_from_secs(0.0), Duration::ZERO);
        assert_eq!(ttl_from_secs(-5.0), Duration::ZERO);
        assert_eq!(ttl_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(ttl_from_secs(0.05), Duration::from_millis(50));
        assert_eq!(ttl_from_secs(f64::INFINITY), Duration::MAX);
    }

    #[test]
    fn test_coerce_counter() {
        assert_eq!(coerce_counter("k", &json!(7)).unwrap(), 7);
        assert_eq!(coerce_counter("k", &json!(-3)).unwrap(), -3);
        assert!(matches!(
            coerce_counter("k", &json!(4.0)),
            Err(CacheError::Backend(_))
        ));
        assert!(matches!(
            coerce_counter("k", &json!("12")),
            Err(CacheError::Backend(_))
        ));
        assert!(matches!(
            coerce_counter("k", &json!(1.5)),
            Err(CacheError::Backend(_))
        ));
        assert!(matches!(
            coerce_counter("k", &json!({"a": 1})),
            Err(CacheError::Backend(_))
        ));
        assert!(matches!(
            coerce_counter("k", &json!("abc")),
            Err(CacheError::Backend(_))
        ));
    }

    #[test]
    fn test_apply_delta_detects_overflow() {
        assert_eq!(apply_delta("k", 1, 2).unwrap(), 3);
        assert_eq!(apply_delta("k", 0, -1).unwrap(), -1);
        assert!(apply_delta("k", i64::MAX, 1).is_err());
        assert!(apply_delta("k", i64::MIN, -1).is_err());
    }

    #[test]
    fn test_ttl_millis_rounds_up_to_one() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_millis(1500)), 1500);
    }
}
