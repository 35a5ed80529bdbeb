//! Application layer - Helpers and handlers built on the storage port.
//!
//! - `StateAccessor` - typed load/save with read-modify-write retries
//! - `ExchangeLock` - at-most-once execution keyed by a dedup marker
//! - `handlers` - command handlers, such as token exchange dedup

pub mod exchange_lock;
pub mod handlers;
pub mod state_accessor;

pub use exchange_lock::{ClaimOutcome, ExchangeClaim, ExchangeLock, Exclusive, ExclusiveError};
pub use handlers::{ExchangeTokenCommand, ExchangeTokenHandler, ExchangeTokenResult};
pub use state_accessor::{RetryPolicy, StateAccessor, Versioned};
