//! Utility functions for the file backend

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::constants::{ENTRY_FILE_EXTENSION, TEMP_FILE_EXTENSION};

/// SHA256 of a normalized key, used as the entry filename
pub fn key_to_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Two-hex-character shard directory for a hash
pub fn shard_dir(root: &Path, hash: &str) -> PathBuf {
    root.join(&hash[..2])
}

pub fn entry_path(root: &Path, hash: &str) -> PathBuf {
    shard_dir(root, hash).join(format!("{}.{}", hash, ENTRY_FILE_EXTENSION))
}

/// Unique temp path next to the entry, renamed over it once fully written
pub fn temp_path(root: &Path, hash: &str) -> PathBuf {
    shard_dir(root, hash).join(format!(
        "{}.{}.{}",
        hash,
        uuid::Uuid::new_v4().simple(),
        TEMP_FILE_EXTENSION
    ))
}

/// Whether a file name belongs to this backend
pub fn is_cache_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext == ENTRY_FILE_EXTENSION || ext == TEMP_FILE_EXTENSION
    )
}

/// Shard directories have exactly two lowercase hex characters as their name
pub fn is_shard_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.len() == 2 && n.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')))
        .unwrap_or(false)
}
