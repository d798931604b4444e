//! Names of cache operations, used in log fields, stats and error messages

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheOperation {
    Get,
    Set,
    Delete,
    Exists,
    Clear,
    GetMany,
    SetMany,
    DeleteMany,
    Incr,
    Decr,
    Ttl,
    Touch,
    Health,
    Close,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOperation::Get => "get",
            CacheOperation::Set => "set",
            CacheOperation::Delete => "delete",
            CacheOperation::Exists => "exists",
            CacheOperation::Clear => "clear",
            CacheOperation::GetMany => "get_many",
            CacheOperation::SetMany => "set_many",
            CacheOperation::DeleteMany => "delete_many",
            CacheOperation::Incr => "incr",
            CacheOperation::Decr => "decr",
            CacheOperation::Ttl => "ttl",
            CacheOperation::Touch => "touch",
            CacheOperation::Health => "health",
            CacheOperation::Close => "close",
        }
    }

    /// Operations that change stored state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            CacheOperation::Set
                | CacheOperation::SetMany
                | CacheOperation::Incr
                | CacheOperation::Decr
                | CacheOperation::Touch
        )
    }
}

impl fmt::Display for CacheOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
