// Redis key formatting and hashing utilities

use sha2::{Digest, Sha256};

use crate::constants::MAX_REDIS_KEY_LENGTH;

/// Formats a Redis key inside a backend's namespace
///
/// # Format
/// - Short keys: "{prefix}:{key}" with the key URL encoded
/// - Long keys: "{prefix}:hash:{sha256}"
pub fn format_key(prefix: &str, key: &str) -> String {
    let encoded_key = urlencoding::encode(key);
    let full_key = format!("{}:{}", prefix, encoded_key);

    if full_key.len() > MAX_REDIS_KEY_LENGTH {
        hash_long_key(prefix, key)
    } else {
        full_key
    }
}

fn hash_long_key(prefix: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}:hash:{}", prefix, hex::encode(hasher.finalize()))
}

/// Validates a cache key before Redis operations
pub fn validate_key(key: &str) -> Result<(), String> {
    if key.contains('\0') {
        return Err("Key contains null bytes".to_string());
    }
    // Redis hard limit
    if key.len() > 512 * 1024 * 1024 {
        return Err("Key exceeds Redis limit of 512MB".to_string());
    }
    Ok(())
}

/// SCAN pattern matching every key in the namespace
pub fn namespace_pattern(prefix: &str) -> String {
    format!("{}:*", escape_glob(prefix))
}

/// True when `redis_key` was produced by `format_key` for this prefix
///
/// SCAN patterns also match namespaces nested under the prefix, so
/// `app` sees `app:v2:x`. Formatted keys never contain a raw colon after
/// the prefix except in the hashed form.
pub fn is_own_key(prefix: &str, redis_key: &str) -> bool {
    let suffix = match redis_key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix(':'))
    {
        Some(suffix) => suffix,
        None => return false,
    };
    if !suffix.contains(':') {
        return true;
    }
    suffix
        .strip_prefix("hash:")
        .map(|digest| digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

/// Escape glob metacharacters so a prefix matches literally
pub fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
