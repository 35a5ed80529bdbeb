//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the state layer to physical media and external services:
//! - `storage` - in-memory, file, and Redis state backends
//! - `token` - token exchanger implementations

pub mod storage;
pub mod token;

pub use storage::{FileStorage, FileStorageOptions, InMemoryStorage, RedisStorage};
pub use token::MockTokenExchanger;
