//! Storage Port - Interface for versioned state persistence.
//!
//! Conversation, user, and bot state are persisted through this port.
//! Every backend enforces the same compare-and-swap contract on writes:
//!
//! | Entry etag | Key absent | Key present at `v` |
//! |------------|------------|--------------------|
//! | none / empty | write, issue new etag | `PreconditionFailed` |
//! | `"*"` | write, issue new etag | write, issue new etag |
//! | `k` | `PreconditionFailed` | write if `k == v`, else `PreconditionFailed` |
//!
//! Batches are applied key by key. A conflict on one key never blocks or
//! rolls back another key in the same call; the [`WriteReport`] lists what
//! was committed and what was rejected.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};

use crate::domain::foundation::ValidationError;
use crate::domain::state::{CodecError, Conflict, ETag, StateEntry, StoredEntry};

/// Errors that can occur during storage operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Precondition failed for key '{key}': {conflict}")]
    PreconditionFailed { key: String, conflict: Conflict },

    #[error("Failed to serialize state: {0}")]
    Serialization(String),

    #[error("Failed to deserialize state: {0}")]
    Deserialization(String),

    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Key is {len} bytes, limit is {max}")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value for key '{key}' is {len} bytes, limit is {max}")]
    ValueTooLarge { key: String, len: usize, max: usize },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Stored entry for key '{key}' is corrupt: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("State for key '{key}' is stale after {attempts} attempts")]
    StaleState { key: String, attempts: u32 },
}

impl StorageError {
    /// Whether the caller may succeed by re-reading and trying again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::PreconditionFailed { .. } | StorageError::BackendUnavailable(_)
        )
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StorageError::PreconditionFailed { .. })
    }

    pub(crate) fn precondition(key: &str, conflict: Conflict) -> Self {
        StorageError::PreconditionFailed {
            key: key.to_string(),
            conflict,
        }
    }

    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        StorageError::BackendUnavailable(err.to_string())
    }
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Serialization { .. } => StorageError::Serialization(err.to_string()),
            CodecError::TypeMismatch { .. } | CodecError::Deserialization { .. } => {
                StorageError::Deserialization(err.to_string())
            }
        }
    }
}

impl From<ValidationError> for StorageError {
    fn from(err: ValidationError) -> Self {
        StorageError::InvalidKey(err.to_string())
    }
}

/// Per-key outcome of a batched write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Keys written, with the version issued for each.
    pub committed: BTreeMap<String, ETag>,
    /// Keys left untouched, with the reason.
    pub rejected: BTreeMap<String, StorageError>,
}

impl WriteReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, key: impl Into<String>, etag: ETag) {
        self.committed.insert(key.into(), etag);
    }

    pub fn reject(&mut self, key: impl Into<String>, error: StorageError) {
        self.rejected.insert(key.into(), error);
    }

    /// Records the outcome of one key.
    pub fn record(&mut self, key: impl Into<String>, outcome: Result<ETag, StorageError>) {
        match outcome {
            Ok(etag) => self.commit(key, etag),
            Err(error) => self.reject(key, error),
        }
    }

    /// `true` when every key in the batch was written.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    /// Returns the committed versions, or the first rejection.
    pub fn into_result(self) -> Result<BTreeMap<String, ETag>, StorageError> {
        match self.rejected.into_values().next() {
            Some(error) => Err(error),
            None => Ok(self.committed),
        }
    }

    /// Extracts the outcome of a single key.
    pub fn outcome(mut self, key: &str) -> Result<ETag, StorageError> {
        if let Some(error) = self.rejected.remove(key) {
            return Err(error);
        }
        self.committed.remove(key).ok_or_else(|| {
            StorageError::BackendUnavailable(format!("no outcome reported for key '{}'", key))
        })
    }
}

/// Port for reading, writing, and deleting versioned state entries.
///
/// Implementations must be safe to share between concurrent turns
/// without caller-side locking. A cancelled `write` has an unknown
/// outcome; callers re-read to find out whether it landed.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read entries by key.
    ///
    /// Keys that do not exist are absent from the result.
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoredEntry>, StorageError>;

    /// Write entries, each under its own compare-and-swap.
    ///
    /// # Errors
    /// `Err` only when the whole call failed. Per-key failures, including
    /// `PreconditionFailed`, are reported in the returned `WriteReport`.
    async fn write(&self, changes: BTreeMap<String, StateEntry>)
        -> Result<WriteReport, StorageError>;

    /// Delete entries by key. Deleting an absent key is not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), StorageError>;

    /// Short name of the physical medium, for logs.
    fn backend_name(&self) -> &'static str;

    /// Read a single key.
    async fn read_one(&self, key: &str) -> Result<Option<StoredEntry>, StorageError> {
        let mut found = self.read(&[key.to_string()]).await?;
        Ok(found.remove(key))
    }

    /// Write a single key and return the version issued for it.
    async fn write_one(&self, key: &str, entry: StateEntry) -> Result<ETag, StorageError> {
        let mut changes = BTreeMap::new();
        changes.insert(key.to_string(), entry);
        self.write(changes).await?.outcome(key)
    }

    /// Delete a single key.
    async fn delete_one(&self, key: &str) -> Result<(), StorageError> {
        self.delete(&[key.to_string()]).await
    }
}

/// Checks a key against the medium's limits before touching the medium.
pub(crate) fn validate_key(key: &str, max_key_bytes: usize) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key cannot be empty".to_string()));
    }
    if key.len() > max_key_bytes {
        return Err(StorageError::KeyTooLarge {
            len: key.len(),
            max: max_key_bytes,
        });
    }
    Ok(())
}

/// Checks a payload against the medium's value limit.
pub(crate) fn validate_value(
    key: &str,
    entry: &StateEntry,
    max_value_bytes: usize,
) -> Result<(), StorageError> {
    let len = entry.value.len();
    if len > max_value_bytes {
        return Err(StorageError::ValueTooLarge {
            key: key.to_string(),
            len,
            max: max_value_bytes,
        });
    }
    Ok(())
}
