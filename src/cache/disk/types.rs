//! On-disk entry format
//!
//! ```text
//! +------+----------------+-------------+---------+
//! | KURA | header len u32 | JSON header | payload |
//! +------+----------------+-------------+---------+
//! ```
//!
//! The header carries the original key and the expiry so both can be read
//! without decoding the payload. The payload is whatever the configured
//! `ValueCodec` produced.

use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::error::CacheError;

pub const ENTRY_MAGIC: &[u8; 4] = b"KURA";

const PREFIX_LEN: usize = 8;

/// Metadata stored in front of every entry payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHeader {
    pub key: String,
    pub created_at_us: i64,
    /// Absolute expiry in Unix microseconds, `None` for persistent entries
    #[serde(default)]
    pub expires_at_us: Option<i64>,
}

impl EntryHeader {
    pub fn new(key: &str, created_at: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.to_string(),
            created_at_us: created_at.timestamp_micros(),
            expires_at_us: expires_at.map(expiry_micros),
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at_us.map(|us| {
            Utc.timestamp_micros(us)
                .single()
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        })
    }
}

/// Expiry in Unix microseconds, rounded up so an entry never expires early
pub fn expiry_micros(at: DateTime<Utc>) -> i64 {
    let micros = at.timestamp_micros();
    if at.nanosecond() % 1_000 == 0 {
        micros
    } else {
        micros.saturating_add(1)
    }
}

/// Serialize header and payload into the file layout
pub fn encode_entry(header: &EntryHeader, payload: &[u8]) -> Result<Vec<u8>, CacheError> {
    let header_bytes = serde_json::to_vec(header)?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| CacheError::Backend("entry header too large".to_string()))?;

    let mut out = Vec::with_capacity(PREFIX_LEN + header_bytes.len() + payload.len());
    out.extend_from_slice(ENTRY_MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split raw file contents into header and payload
///
/// Structural damage (magic, truncation, unreadable header) is a backend
/// error; decoding the payload is left to the codec.
pub fn decode_entry(raw: &[u8]) -> Result<(EntryHeader, &[u8]), CacheError> {
    if raw.len() < PREFIX_LEN || &raw[..4] != ENTRY_MAGIC {
        return Err(CacheError::Backend(
            "corrupt cache entry: bad magic".to_string(),
        ));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[4..PREFIX_LEN]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;

    let header_end = PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| *end <= raw.len())
        .ok_or_else(|| CacheError::Backend("corrupt cache entry: truncated header".to_string()))?;

    let header: EntryHeader = serde_json::from_slice(&raw[PREFIX_LEN..header_end])
        .map_err(|e| CacheError::Backend(format!("corrupt cache entry header: {}", e)))?;

    Ok((header, &raw[header_end..]))
}
