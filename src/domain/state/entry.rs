//! Stored entries and the write requests that produce them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::codec::{encode, CodecError, StateValue, TypedPayload};
use super::etag::{ETag, Precondition};

/// A write request for one key.
///
/// The `etag` carries the caller's view of the stored version:
/// `None` creates the key only if it is absent, `"*"` writes
/// unconditionally, anything else must match the stored version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub value: TypedPayload,
    pub etag: Option<ETag>,
}

impl StateEntry {
    /// Create-if-absent write.
    pub fn new(value: TypedPayload) -> Self {
        Self { value, etag: None }
    }

    /// Write that must match the stored version.
    pub fn if_match(value: TypedPayload, etag: ETag) -> Self {
        Self {
            value,
            etag: Some(etag),
        }
    }

    /// Write that replaces whatever is stored.
    pub fn unconditional(value: TypedPayload) -> Self {
        Self {
            value,
            etag: Some(ETag::any()),
        }
    }

    /// Encodes a typed value and wraps it with the given version.
    pub fn encode<T: StateValue>(value: &T, etag: Option<ETag>) -> Result<Self, CodecError> {
        Ok(Self {
            value: encode(value)?,
            etag,
        })
    }

    pub fn precondition(&self) -> Precondition {
        Precondition::from_etag(self.etag.as_ref())
    }
}

/// An entry as read back from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: TypedPayload,
    /// Version issued by the backend on the write that produced this entry.
    pub etag: ETag,
    pub last_modified: DateTime<Utc>,
}

impl StoredEntry {
    pub fn new(value: TypedPayload, etag: ETag) -> Self {
        Self {
            value,
            etag,
            last_modified: Utc::now(),
        }
    }

    /// A write request that replaces this revision and nothing newer.
    pub fn next(&self, value: TypedPayload) -> StateEntry {
        StateEntry::if_match(value, self.etag.clone())
    }
}

/// Size limits imposed by the physical medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageLimits {
    /// Maximum length of a logical key in bytes.
    pub max_key_bytes: usize,
    /// Maximum length of a serialized value in bytes.
    pub max_value_bytes: usize,
}

impl StorageLimits {
    pub const DEFAULT_MAX_KEY_BYTES: usize = 1024;
    pub const DEFAULT_MAX_VALUE_BYTES: usize = 4 * 1024 * 1024;
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self {
            max_key_bytes: Self::DEFAULT_MAX_KEY_BYTES,
            max_value_bytes: Self::DEFAULT_MAX_VALUE_BYTES,
        }
    }
}
