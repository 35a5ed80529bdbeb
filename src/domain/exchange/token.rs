//! Token values produced by a successful exchange.

use serde::{Deserialize, Serialize};

/// Status code returned to the channel when an exchange cannot complete.
pub const PRECONDITION_FAILED_STATUS: u16 = 412;

/// Detail sent with a declined exchange so the client falls back to sign-in.
pub const EXCHANGE_DECLINED_DETAIL: &str =
    "The bot is unable to exchange token. Proceed with regular login.";

/// A user token issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub channel_id: String,
    pub connection_name: String,
    pub token: String,
    /// Expiration as reported by the provider (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}
