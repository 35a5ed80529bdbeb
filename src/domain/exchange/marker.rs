//! The record written to a dedup key when an exchange is claimed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::state::StateValue;

/// Marker stored under a dedup key.
///
/// Known fields are typed; anything else found in a stored marker (for
/// example fields written by a newer release) is kept in `extensions`
/// and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeMarker {
    /// Identity of the exchange being guarded.
    pub exchange_id: String,

    /// Instance that claimed the exchange, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    pub claimed_at: DateTime<Utc>,

    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl ExchangeMarker {
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            owner: None,
            claimed_at: Utc::now(),
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(name.into(), value);
        self
    }
}

impl StateValue for ExchangeMarker {
    const TYPE_NAME: &'static str = "exchange_marker";
}
