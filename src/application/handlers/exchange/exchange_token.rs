//! ExchangeTokenHandler - Command handler for single sign-on token exchange.
//!
//! A channel may deliver the same exchange request to several bot instances
//! at once. Only the instance that claims the dedup key talks to the
//! identity provider; the others answer with a plain acknowledgement.

use std::sync::Arc;

use crate::application::exchange_lock::{ExchangeLock, Exclusive, ExclusiveError};
use crate::domain::exchange::{
    ExchangeMarker, TokenResponse, EXCHANGE_DECLINED_DETAIL, PRECONDITION_FAILED_STATUS,
};
use crate::domain::state::token_exchange_key;
use crate::ports::{StorageError, TokenExchangeError, TokenExchangeRequest, TokenExchanger};

/// Command to exchange a channel token.
#[derive(Debug, Clone)]
pub struct ExchangeTokenCommand {
    pub channel_id: String,
    pub conversation_id: String,
    /// Identifier the channel assigned to this exchange request.
    pub exchange_id: String,
    pub user_id: String,
    pub connection_name: String,
    pub token: String,
}

impl ExchangeTokenCommand {
    fn request(&self) -> TokenExchangeRequest {
        TokenExchangeRequest {
            channel_id: self.channel_id.clone(),
            user_id: self.user_id.clone(),
            connection_name: self.connection_name.clone(),
            token: self.token.clone(),
        }
    }
}

/// How the turn should answer the exchange request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeTokenResult {
    /// This instance exchanged the token.
    Exchanged(TokenResponse),
    /// Another turn owns this exchange; acknowledge and stop.
    Duplicate,
    /// The exchange could not complete; the client should fall back to sign-in.
    Declined { status: u16, detail: String },
}

impl ExchangeTokenResult {
    fn declined() -> Self {
        ExchangeTokenResult::Declined {
            status: PRECONDITION_FAILED_STATUS,
            detail: EXCHANGE_DECLINED_DETAIL.to_string(),
        }
    }
}

/// Handler for token exchange requests.
pub struct ExchangeTokenHandler {
    lock: ExchangeLock,
    exchanger: Arc<dyn TokenExchanger>,
    /// Recorded as the marker owner, for diagnosing who handled an exchange
    instance_id: Option<String>,
}

impl ExchangeTokenHandler {
    pub fn new(lock: ExchangeLock, exchanger: Arc<dyn TokenExchanger>) -> Self {
        Self {
            lock,
            exchanger,
            instance_id: None,
        }
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// # Errors
    /// Storage failures while claiming or releasing the dedup key. Provider
    /// failures are not errors; they yield `Declined`.
    pub async fn handle(&self, cmd: ExchangeTokenCommand) -> Result<ExchangeTokenResult, StorageError> {
        // 1. Build the dedup key
        let key = token_exchange_key(&cmd.channel_id, &cmd.conversation_id, &cmd.exchange_id)?;

        let mut marker = ExchangeMarker::new(&cmd.exchange_id);
        if let Some(instance_id) = &self.instance_id {
            marker = marker.with_owner(instance_id);
        }

        // 2. Exchange only if this turn owns the key
        let request = cmd.request();
        let exchanger = self.exchanger.clone();
        let outcome = self
            .lock
            .run_exclusive(&key, &marker, move || async move {
                match exchanger.exchange(&request).await? {
                    Some(token) => Ok(token),
                    None => Err(TokenExchangeError::Rejected(
                        "provider issued no token".to_string(),
                    )),
                }
            })
            .await;

        // 3. Map onto the channel response
        match outcome {
            Ok(Exclusive::Ran(token)) => {
                tracing::debug!(key = %key, "token exchanged");
                Ok(ExchangeTokenResult::Exchanged(token))
            }
            Ok(Exclusive::Skipped) => {
                tracing::debug!(key = %key, "duplicate token exchange acknowledged");
                Ok(ExchangeTokenResult::Duplicate)
            }
            Err(ExclusiveError::Work(err)) => {
                tracing::warn!(key = %key, error = %err, "token exchange declined");
                Ok(ExchangeTokenResult::declined())
            }
            Err(ExclusiveError::Storage(err)) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::InMemoryStorage;
    use crate::ports::Storage;
    use crate::adapters::token::MockTokenExchanger;
    use crate::domain::exchange::RetentionPolicy;

    fn command(exchange_id: &str) -> ExchangeTokenCommand {
        ExchangeTokenCommand {
            channel_id: "msteams".to_string(),
            conversation_id: "c1".to_string(),
            exchange_id: exchange_id.to_string(),
            user_id: "user-1".to_string(),
            connection_name: "graph".to_string(),
            token: "client-token".to_string(),
        }
    }

    fn handler(
        storage: &InMemoryStorage,
        exchanger: Arc<MockTokenExchanger>,
    ) -> ExchangeTokenHandler {
        ExchangeTokenHandler::new(ExchangeLock::new(Arc::new(storage.clone())), exchanger)
    }

    #[tokio::test]
    async fn first_request_exchanges_token() {
        let storage = InMemoryStorage::new();
        let exchanger = Arc::new(MockTokenExchanger::new().with_token("sso"));
        let handler = handler(&storage, exchanger.clone());

        let result = handler.handle(command("x1")).await.unwrap();

        let ExchangeTokenResult::Exchanged(token) = result else {
            panic!("expected an exchanged token, got {:?}", result);
        };
        assert_eq!(token.token, "sso");
        assert_eq!(token.channel_id, "msteams");
        assert_eq!(exchanger.call_count(), 1);
    }

    #[tokio::test]
    async fn repeated_request_is_duplicate() {
        let storage = InMemoryStorage::new();
        let exchanger = Arc::new(MockTokenExchanger::new());
        let handler = handler(&storage, exchanger.clone());

        handler.handle(command("x1")).await.unwrap();
        let second = handler.handle(command("x1")).await.unwrap();

        assert_eq!(second, ExchangeTokenResult::Duplicate);
        assert_eq!(exchanger.call_count(), 1);
    }

    #[tokio::test]
    async fn distinct_exchange_ids_are_independent() {
        let storage = InMemoryStorage::new();
        let exchanger = Arc::new(MockTokenExchanger::new());
        let handler = handler(&storage, exchanger.clone());

        handler.handle(command("x1")).await.unwrap();
        let other = handler.handle(command("x2")).await.unwrap();

        assert!(matches!(other, ExchangeTokenResult::Exchanged(_)));
        assert_eq!(exchanger.call_count(), 2);
    }

    #[tokio::test]
    async fn missing_token_is_declined_with_412() {
        let storage = InMemoryStorage::new();
        let handler = handler(&storage, Arc::new(MockTokenExchanger::new().without_token()));

        let result = handler.handle(command("x1")).await.unwrap();

        assert_eq!(
            result,
            ExchangeTokenResult::Declined {
                status: 412,
                detail: "The bot is unable to exchange token. Proceed with regular login."
                    .to_string(),
            }
        );
    }

    #[tokio::test]
    async fn declined_exchange_can_be_retried() {
        let storage = InMemoryStorage::new();
        let failing = handler(
            &storage,
            Arc::new(
                MockTokenExchanger::new()
                    .with_error(TokenExchangeError::Unavailable("timeout".to_string())),
            ),
        );
        let working = handler(&storage, Arc::new(MockTokenExchanger::new()));

        let first = failing.handle(command("x1")).await.unwrap();
        let retry = working.handle(command("x1")).await.unwrap();

        assert!(matches!(first, ExchangeTokenResult::Declined { .. }));
        assert!(matches!(retry, ExchangeTokenResult::Exchanged(_)));
    }

    #[tokio::test]
    async fn release_on_completion_allows_repeat_exchange() {
        let storage = InMemoryStorage::new();
        let exchanger = Arc::new(MockTokenExchanger::new());
        let lock = ExchangeLock::new(Arc::new(storage.clone()))
            .with_policy(RetentionPolicy::ReleaseOnCompletion);
        let handler = ExchangeTokenHandler::new(lock, exchanger.clone());

        handler.handle(command("x1")).await.unwrap();
        handler.handle(command("x1")).await.unwrap();

        assert_eq!(exchanger.call_count(), 2);
    }

    #[tokio::test]
    async fn marker_records_instance_id() {
        let storage = InMemoryStorage::new();
        let handler = handler(&storage, Arc::new(MockTokenExchanger::new()))
            .with_instance_id("bot-a");

        handler.handle(command("x1")).await.unwrap();

        let stored = storage
            .read_one("msteams/conversations/c1/token-exchange-id/x1")
            .await
            .unwrap()
            .unwrap();
        let marker: ExchangeMarker = crate::domain::state::decode(&stored.value).unwrap();
        assert_eq!(marker.owner.as_deref(), Some("bot-a"));
    }

    #[tokio::test]
    async fn empty_exchange_id_is_invalid_key() {
        let storage = InMemoryStorage::new();
        let handler = handler(&storage, Arc::new(MockTokenExchanger::new()));

        let result = handler.handle(command(" ")).await;

        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
