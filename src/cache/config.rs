//! Cache configuration types
//!
//! This module defines configuration structures for the manager and for
//! each backend kind:
//! - Memory backend configuration
//! - File backend configuration
//! - Redis backend configuration
//!
//! Backend kinds form a closed tagged enum (`kind: memory|file|redis` in
//! YAML). Adding a kind means adding a variant here and a branch in
//! `BackendFactory::create`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_BACKEND_NAME, DEFAULT_REDIS_CONNECTION_TIMEOUT_MS, DEFAULT_REDIS_KEY_PREFIX,
    DEFAULT_REDIS_OPERATION_TIMEOUT_MS,
};

use super::codec::SerializerKind;
use super::traits::BackendKind;

/// Manager configuration: the backends to build and which one is the default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

impl Default for ManagerConfig {
    /// A single memory backend named "default"
    fn default() -> Self {
        Self {
            default_backend: Some(DEFAULT_BACKEND_NAME.to_string()),
            backends: vec![BackendConfig::Memory(MemoryBackendConfig::named(
                DEFAULT_BACKEND_NAME,
            ))],
        }
    }
}

impl ManagerConfig {
    /// Parse YAML, replacing `${VAR_NAME}` with environment variable values
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // First, check that all referenced environment variables exist
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    /// Backends that will actually be constructed
    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().filter(|b| b.enabled())
    }

    /// Validate manager configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.backends.is_empty() {
            return Err("at least one backend must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            let name = backend.name();
            if name.trim().is_empty() {
                return Err("backend name cannot be empty".to_string());
            }
            if !seen.insert(name) {
                return Err(format!("Duplicate backend name: '{}'", name));
            }
            backend
                .validate()
                .map_err(|e| format!("backend '{}': {}", name, e))?;
        }

        if self.enabled_backends().next().is_none() {
            return Err("no enabled backends configured".to_string());
        }

        if let Some(default) = &self.default_backend {
            match self.backends.iter().find(|b| b.name() == default) {
                None => {
                    return Err(format!(
                        "default_backend '{}' is not a configured backend",
                        default
                    ))
                }
                Some(b) if !b.enabled() => {
                    return Err(format!("default_backend '{}' is disabled", default))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Configuration of one backend instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory(MemoryBackendConfig),
    File(FileBackendConfig),
    Redis(RedisBackendConfig),
}

impl BackendConfig {
    pub fn name(&self) -> &str {
        match self {
            BackendConfig::Memory(c) => &c.name,
            BackendConfig::File(c) => &c.name,
            BackendConfig::Redis(c) => &c.name,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Memory(_) => BackendKind::Memory,
            BackendConfig::File(_) => BackendKind::File,
            BackendConfig::Redis(_) => BackendKind::Redis,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            BackendConfig::Memory(c) => c.enabled,
            BackendConfig::File(c) => c.enabled,
            BackendConfig::Redis(c) => c.enabled,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            BackendConfig::Memory(c) => c.validate(),
            BackendConfig::File(c) => c.validate(),
            BackendConfig::Redis(c) => c.validate(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_create_dir() -> bool {
    true
}

fn default_connection_timeout_ms() -> u64 {
    DEFAULT_REDIS_CONNECTION_TIMEOUT_MS
}

fn default_operation_timeout_ms() -> u64 {
    DEFAULT_REDIS_OPERATION_TIMEOUT_MS
}

/// Memory backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBackendConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Upper bound on stored entries; least recently written entries are evicted
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl MemoryBackendConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            max_entries: None,
        }
    }

    /// Validate memory backend configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == Some(0) {
            return Err("max_entries must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// File backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileBackendConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Create the directory when it does not exist yet
    #[serde(default = "default_create_dir")]
    pub create_dir: bool,
    #[serde(default)]
    pub serializer: SerializerKind,
    /// Upper bound on entry files; oldest files are evicted after writes
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl FileBackendConfig {
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            directory: Some(directory.into()),
            create_dir: true,
            serializer: SerializerKind::default(),
            max_entries: None,
        }
    }

    /// Validate file backend configuration
    pub fn validate(&self) -> Result<(), String> {
        match &self.directory {
            None => return Err("directory is required for a file backend".to_string()),
            Some(dir) if dir.as_os_str().is_empty() => {
                return Err("directory cannot be empty".to_string())
            }
            Some(_) => {}
        }
        if self.max_entries == Some(0) {
            return Err("max_entries must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Redis backend configuration
///
/// Credentials and database number travel in the URL
/// (`redis://:password@host:6379/2`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisBackendConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// Namespace for keys; defaults to "kura:{name}"
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub serializer: SerializerKind,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl RedisBackendConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            url: Some(url.into()),
            key_prefix: None,
            serializer: SerializerKind::default(),
            connection_timeout_ms: default_connection_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }

    pub fn resolved_key_prefix(&self) -> String {
        match &self.key_prefix {
            Some(prefix) => prefix.trim_end_matches(':').to_string(),
            None => format!("{}:{}", DEFAULT_REDIS_KEY_PREFIX, self.name),
        }
    }

    /// Validate redis backend configuration
    pub fn validate(&self) -> Result<(), String> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| "url is required for a redis backend".to_string())?;
        if !url.starts_with("redis://") && !url.starts_with("rediss://") {
            return Err("url must start with redis:// or rediss:// (for TLS)".to_string());
        }
        if let Some(prefix) = &self.key_prefix {
            if prefix.trim_end_matches(':').is_empty() {
                return Err("key_prefix cannot be empty".to_string());
            }
        }
        if self.connection_timeout_ms == 0 || self.operation_timeout_ms == 0 {
            return Err("timeouts must be greater than zero".to_string());
        }
        Ok(())
    }
}
