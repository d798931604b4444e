// Constants module - centralized default values for configuration
//
// Defaults used by the backend configuration structs and the backends
// themselves. Keeping them here avoids magic numbers scattered across
// the cache modules.

// =============================================================================
// Manager defaults
// =============================================================================

/// Name of the backend created when no configuration is supplied
pub const DEFAULT_BACKEND_NAME: &str = "default";

// =============================================================================
// File backend defaults
// =============================================================================

/// Number of striped locks guarding per-key file access
pub const FILE_LOCK_STRIPES: usize = 64;

/// Extension of committed entry files
pub const ENTRY_FILE_EXTENSION: &str = "entry";

/// Extension of in-flight temp files
pub const TEMP_FILE_EXTENSION: &str = "tmp";

// =============================================================================
// Redis defaults
// =============================================================================

/// Prefix prepended to the backend name to build the default key namespace
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "kura";

/// Default Redis connection timeout in milliseconds
pub const DEFAULT_REDIS_CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Default Redis per-operation timeout in milliseconds
pub const DEFAULT_REDIS_OPERATION_TIMEOUT_MS: u64 = 2000;

/// Batch size hint for SCAN during clear
pub const REDIS_SCAN_COUNT: usize = 500;

/// Keys longer than this are hashed before reaching Redis
pub const MAX_REDIS_KEY_LENGTH: usize = 250;

// =============================================================================
// Bridge runtime defaults
// =============================================================================

/// Worker threads of the runtime that drives async backends from blocking callers
pub const BRIDGE_WORKER_THREADS: usize = 2;
