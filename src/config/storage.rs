//! Storage backend selection

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ValidationError;
use super::redis::RedisConfig;
use crate::domain::state::StorageLimits;

/// Which physical medium backs the state store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local map; state is lost on restart
    #[default]
    Memory,
    /// One blob file per key under a root directory
    File,
    /// Hashes on a Redis server, shared between instances
    Redis,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub file: FileStorageConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub limits: StorageLimits,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.limits.max_key_bytes == 0 {
            return Err(ValidationError::MustBePositive("STORAGE__LIMITS__MAX_KEY_BYTES"));
        }
        if self.limits.max_value_bytes == 0 {
            return Err(ValidationError::MustBePositive("STORAGE__LIMITS__MAX_VALUE_BYTES"));
        }
        match self.backend {
            BackendKind::Memory => Ok(()),
            BackendKind::File => self.file.validate(),
            BackendKind::Redis => self.redis.validate(),
        }
    }
}

/// File backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding the blob files
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// How long a writer waits for a held key lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Pause between lock attempts
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,

    /// Age after which a lock left by a crashed writer is broken
    #[serde(default = "default_stale_lock_ms")]
    pub stale_lock_ms: u64,
}

impl FileStorageConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }

    pub fn stale_lock(&self) -> Duration {
        Duration::from_millis(self.stale_lock_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.root.as_os_str().is_empty() {
            return Err(ValidationError::MissingRequired("STORAGE__FILE__ROOT"));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ValidationError::MustBePositive("STORAGE__FILE__LOCK_TIMEOUT_MS"));
        }
        if self.lock_retry_ms == 0 {
            return Err(ValidationError::MustBePositive("STORAGE__FILE__LOCK_RETRY_MS"));
        }
        if self.stale_lock_ms == 0 {
            return Err(ValidationError::MustBePositive("STORAGE__FILE__STALE_LOCK_MS"));
        }
        Ok(())
    }
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_ms: default_lock_retry_ms(),
            stale_lock_ms: default_stale_lock_ms(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./data/state")
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_lock_retry_ms() -> u64 {
    5
}

fn default_stale_lock_ms() -> u64 {
    30_000
}
