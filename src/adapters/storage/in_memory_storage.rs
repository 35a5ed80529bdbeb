//! In-Memory Storage Adapter
//!
//! Stores state entries in a process-local map.
//! Useful for testing, development, and single-instance bots.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::state::{ETag, StateEntry, StorageLimits, StoredEntry};
use crate::ports::{validate_key, validate_value, Storage, StorageError, WriteReport};

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, StoredEntry>,
    /// Last version number issued by this instance.
    issued: u64,
}

impl MemoryState {
    /// Issues `v1`, `v2`, ... across all keys, so a token never matches
    /// any key other than the one it was issued for.
    fn issue_etag(&mut self) -> ETag {
        self.issued += 1;
        ETag::new(format!("v{}", self.issued))
    }
}

/// In-memory storage for state entries
///
/// Cloning shares the underlying map; every clone observes the same entries.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    state: Arc<RwLock<MemoryState>>,
    limits: StorageLimits,
}

impl InMemoryStorage {
    /// Create a new in-memory storage with default limits
    pub fn new() -> Self {
        Self::with_limits(StorageLimits::default())
    }

    /// Create a new in-memory storage with explicit limits
    pub fn with_limits(limits: StorageLimits) -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            limits,
        }
    }

    /// Clear all stored data (useful for tests)
    pub async fn clear(&self) {
        self.state.write().await.entries.clear();
    }

    /// Get the number of stored entries
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoredEntry>, StorageError> {
        for key in keys {
            validate_key(key, self.limits.max_key_bytes)?;
        }

        let state = self.state.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| {
                state
                    .entries
                    .get(key)
                    .map(|entry| (key.clone(), entry.clone()))
            })
            .collect())
    }

    async fn write(
        &self,
        changes: BTreeMap<String, StateEntry>,
    ) -> Result<WriteReport, StorageError> {
        let mut report = WriteReport::new();
        let mut state = self.state.write().await;

        for (key, entry) in changes {
            if let Err(err) = validate_key(&key, self.limits.max_key_bytes)
                .and_then(|_| validate_value(&key, &entry, self.limits.max_value_bytes))
            {
                report.reject(key, err);
                continue;
            }

            let current = state.entries.get(&key).map(|stored| &stored.etag);
            if let Err(conflict) = entry.precondition().check(current) {
                tracing::debug!(key = %key, %conflict, "memory write rejected");
                let err = StorageError::precondition(&key, conflict);
                report.reject(key, err);
                continue;
            }

            let etag = state.issue_etag();
            state
                .entries
                .insert(key.clone(), StoredEntry::new(entry.value, etag.clone()));
            report.commit(key, etag);
        }

        Ok(report)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            validate_key(key, self.limits.max_key_bytes)?;
        }
        let mut state = self.state.write().await;
        for key in keys {
            state.entries.remove(key);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
