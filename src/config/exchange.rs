//! Exchange deduplication configuration

use serde::Deserialize;

use crate::domain::exchange::RetentionPolicy;

/// Exchange lock configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeConfig {
    /// What happens to a dedup marker after the exchange ran
    #[serde(default)]
    pub retention: RetentionPolicy,
}
