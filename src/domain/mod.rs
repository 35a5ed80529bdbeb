//! Domain layer containing storage vocabulary and pure rules.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (validation errors)
//! - `state` - Entries, version tokens, the concurrency guard, codec, key naming
//! - `exchange` - Dedup markers and token exchange values

pub mod exchange;
pub mod foundation;
pub mod state;
