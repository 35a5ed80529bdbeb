//! State storage vocabulary.
//!
//! - `codec` - type-erased payloads (`TypedPayload`, `StateValue`)
//! - `etag` - version tokens and the compare-and-swap guard
//! - `entry` - write requests, stored entries, medium limits
//! - `key` - scope keys and physical name escaping

pub mod codec;
pub mod etag;
pub mod entry;
pub mod key;

pub use codec::{decode, encode, CodecError, StateValue, TypedPayload};
pub use entry::{StateEntry, StorageLimits, StoredEntry};
pub use etag::{Conflict, ETag, Precondition, WILDCARD_ETAG};
pub use key::{conversation_key, escape_key, token_exchange_key, unescape_key, user_key};
