//! Mock token exchanger for testing.
//!
//! Answers every exchange with a fixed outcome and counts how often the
//! provider was actually called, which is what dedup tests assert on.
//!
//! # Example
//!
//! ```ignore
//! let exchanger = MockTokenExchanger::new().with_token("sso-token");
//! let result = exchanger.exchange(&request).await;
//! assert_eq!(exchanger.call_count(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::exchange::TokenResponse;
use crate::ports::{TokenExchangeError, TokenExchangeRequest, TokenExchanger};

#[derive(Debug, Clone)]
enum Outcome {
    Token(String),
    NoToken,
    Error(TokenExchangeError),
}

/// Mock exchanger with a configurable response.
///
/// By default every call succeeds with the token `"mock-token"`.
#[derive(Debug)]
pub struct MockTokenExchanger {
    outcome: Outcome,
    /// Held before answering, to widen race windows in concurrency tests
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MockTokenExchanger {
    pub fn new() -> Self {
        Self {
            outcome: Outcome::Token("mock-token".to_string()),
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers with the given token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.outcome = Outcome::Token(token.into());
        self
    }

    /// Answers without a token, as a provider does when consent is missing.
    pub fn without_token(mut self) -> Self {
        self.outcome = Outcome::NoToken;
        self
    }

    /// Fails every call with the specified error.
    pub fn with_error(mut self, error: TokenExchangeError) -> Self {
        self.outcome = Outcome::Error(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of exchanges that reached the provider.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTokenExchanger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenExchanger for MockTokenExchanger {
    async fn exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<Option<TokenResponse>, TokenExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match &self.outcome {
            Outcome::Token(token) => Ok(Some(TokenResponse {
                channel_id: request.channel_id.clone(),
                connection_name: request.connection_name.clone(),
                token: token.clone(),
                expiration: None,
            })),
            Outcome::NoToken => Ok(None),
            Outcome::Error(error) => Err(error.clone()),
        }
    }
}
