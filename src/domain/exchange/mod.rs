//! Exchange deduplication vocabulary.
//!
//! - `ExchangeMarker` - the record stored under a dedup key
//! - `RetentionPolicy` - whether a marker outlives the work it guarded
//! - `TokenResponse` - the result of a completed token exchange

mod marker;
mod retention;
mod token;

pub use marker::ExchangeMarker;
pub use retention::RetentionPolicy;
pub use token::{TokenResponse, EXCHANGE_DECLINED_DETAIL, PRECONDITION_FAILED_STATUS};
