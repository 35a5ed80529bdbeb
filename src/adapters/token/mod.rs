//! Token exchange adapters.

mod mock;

pub use mock::MockTokenExchanger;
