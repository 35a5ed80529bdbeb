//! TokenExchanger port - Interface for single sign-on token exchange.
//!
//! A channel client that already holds a token for the user asks the bot
//! to exchange it for a token on one of the bot's OAuth connections. The
//! identity provider behind this port performs the exchange; the exchange
//! handler guarantees it is called at most once per exchange request.

use async_trait::async_trait;

use crate::domain::exchange::TokenResponse;

/// A single exchange request as received from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeRequest {
    pub channel_id: String,
    pub user_id: String,
    pub connection_name: String,
    /// The client-side token to exchange.
    pub token: String,
}

/// Errors that can occur while talking to the identity provider.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TokenExchangeError {
    #[error("Token service unavailable: {0}")]
    Unavailable(String),

    #[error("Token service rejected the exchange: {0}")]
    Rejected(String),
}

/// Port for exchanging a channel token with the identity provider.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchange a token.
    ///
    /// Returns `Ok(None)` when the provider answered but issued no token
    /// (for example because consent is still required).
    async fn exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<Option<TokenResponse>, TokenExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_exchange_error_display() {
        let err = TokenExchangeError::Unavailable("connection reset".to_string());
        assert_eq!(err.to_string(), "Token service unavailable: connection reset");
    }
}
