//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `Storage` - Versioned state persistence with compare-and-swap writes
//! - `TokenExchanger` - Identity provider used by the token exchange flow

mod storage;
mod token_exchanger;

pub use storage::{Storage, StorageError, WriteReport};
pub use token_exchanger::{TokenExchangeError, TokenExchangeRequest, TokenExchanger};

pub(crate) use storage::{validate_key, validate_value};
