//! Filesystem cache backend
//!
//! One file per entry under a sharded directory tree:
//! - `backend`: `FileBackend`, the `CacheBackend` implementation
//! - `types`: entry header and binary layout
//! - `locks`: striped per-key locking
//! - `utils`: key hashing and path generation
//!
//! All I/O is blocking; the manager offloads it to tokio's blocking pool
//! when the backend is used from async code.

pub use self::backend::FileBackend;
pub use self::types::EntryHeader;

mod backend;
mod locks;
mod types;
mod utils;

#[cfg(test)]
mod tests;
