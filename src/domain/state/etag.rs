//! Version tokens and the optimistic concurrency guard.
//!
//! Every backend issues an [`ETag`] on each successful write. Callers treat the
//! token as opaque: they copy it back unmodified on the next write, or use the
//! wildcard / absent forms to express unconditional and create-if-absent writes.
//!
//! ## Per-key state machine
//!
//! ```text
//! Absent   --write(IfAbsent)--> Present(v1)
//! Present(vk) --write(IfMatch(vk))--> Present(v_new)
//! any      --write(Any)--> Present(v_new)
//! any      --delete--> Absent
//! ```
//!
//! Any other write is rejected with a [`Conflict`] and leaves the key untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The wildcard token meaning "write regardless of the stored version".
pub const WILDCARD_ETAG: &str = "*";

/// Opaque version token identifying one stored revision of a key.
///
/// Only equality is meaningful. Tokens are never ordered or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    /// Wraps a raw token.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wildcard token (`"*"`).
    pub fn any() -> Self {
        Self(WILDCARD_ETAG.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD_ETAG
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ETag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ETag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Write condition derived from the version a caller supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// No version supplied: succeed only if the key does not exist.
    IfAbsent,
    /// Succeed only if the stored version equals this token.
    IfMatch(ETag),
    /// Wildcard: always succeed.
    Any,
}

impl Precondition {
    /// Maps the caller-supplied token onto a write condition.
    ///
    /// A missing or empty token is the new-entry marker.
    pub fn from_etag(etag: Option<&ETag>) -> Self {
        match etag {
            None => Precondition::IfAbsent,
            Some(tag) if tag.is_empty() => Precondition::IfAbsent,
            Some(tag) if tag.is_wildcard() => Precondition::Any,
            Some(tag) => Precondition::IfMatch(tag.clone()),
        }
    }

    /// Checks this condition against the currently stored version.
    ///
    /// Backends must call this and commit under the same critical section.
    pub fn check(&self, current: Option<&ETag>) -> Result<(), Conflict> {
        match (self, current) {
            (Precondition::Any, _) => Ok(()),
            (Precondition::IfAbsent, None) => Ok(()),
            (Precondition::IfAbsent, Some(current)) => Err(Conflict::AlreadyExists {
                current: current.clone(),
            }),
            (Precondition::IfMatch(expected), None) => Err(Conflict::Missing {
                expected: expected.clone(),
            }),
            (Precondition::IfMatch(expected), Some(current)) if expected == current => Ok(()),
            (Precondition::IfMatch(expected), Some(current)) => Err(Conflict::Mismatch {
                expected: expected.clone(),
                current: current.clone(),
            }),
        }
    }
}

/// Why a conditional write was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Create-if-absent found an existing entry.
    AlreadyExists { current: ETag },
    /// An if-match write targeted a key that does not exist.
    Missing { expected: ETag },
    /// The stored version differs from the one supplied.
    Mismatch { expected: ETag, current: ETag },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::AlreadyExists { current } => {
                write!(f, "entry already exists at version {}", current)
            }
            Conflict::Missing { expected } => {
                write!(f, "expected version {} but entry does not exist", expected)
            }
            Conflict::Mismatch { expected, current } => {
                write!(f, "expected version {} but found {}", expected, current)
            }
        }
    }
}
