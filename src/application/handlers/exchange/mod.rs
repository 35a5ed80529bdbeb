//! Token exchange command handlers.

mod exchange_token;

pub use exchange_token::{ExchangeTokenCommand, ExchangeTokenHandler, ExchangeTokenResult};
