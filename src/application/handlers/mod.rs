//! Command handlers for the application layer.

pub mod exchange;

pub use exchange::{ExchangeTokenCommand, ExchangeTokenHandler, ExchangeTokenResult};
