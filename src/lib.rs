//! Turn State - versioned conversation state for bots.
//!
//! Conversation, user, and dedup state is persisted through a [`ports::Storage`]
//! backend that enforces optimistic concurrency with opaque version tokens.
//! Backends: in-memory, file blobs, and Redis.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod probe;
pub mod telemetry;
