//! Storage Adapters
//!
//! Implementations of the `Storage` port.
//!
//! ## Available Adapters
//!
//! - **InMemoryStorage** - process-local map (testing, single instance)
//! - **FileStorage** - one JSON blob file per key under a root directory
//! - **RedisStorage** - Redis hashes updated by an atomic CAS script
//!
//! ## Usage
//!
//! ```ignore
//! use turn_state::adapters::storage;
//!
//! let config = AppConfig::load()?;
//! let storage = storage::connect(&config.storage).await?;
//! ```

mod file_storage;
mod in_memory_storage;
mod redis_storage;

pub use file_storage::{FileStorage, FileStorageOptions, MAX_BLOB_NAME_BYTES};
pub use in_memory_storage::InMemoryStorage;
pub use redis_storage::RedisStorage;

use std::sync::Arc;

use crate::config::{BackendKind, StorageConfig};
use crate::ports::{Storage, StorageError};

/// Build the backend selected by configuration.
pub async fn connect(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    let storage: Arc<dyn Storage> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryStorage::with_limits(config.limits)),
        BackendKind::File => {
            let options = FileStorageOptions {
                lock_timeout: config.file.lock_timeout(),
                lock_retry: config.file.lock_retry(),
                stale_lock: config.file.stale_lock(),
                limits: config.limits,
            };
            Arc::new(FileStorage::open_with_options(&config.file.root, options).await?)
        }
        BackendKind::Redis => Arc::new(RedisStorage::connect(&config.redis, config.limits).await?),
    };

    tracing::info!(backend = storage.backend_name(), "storage connected");
    Ok(storage)
}
