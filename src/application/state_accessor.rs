//! Typed access to versioned state with read-modify-write retries.
//!
//! `update` re-reads and re-applies the change whenever a concurrent writer
//! got there first, backing off exponentially between attempts.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::domain::state::{decode, ETag, StateEntry, StateValue};
use crate::ports::{Storage, StorageError};

/// Backoff for lost compare-and-swap races.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): `base * 2^(n-1)`, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

/// A decoded value and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: ETag,
}

/// Typed view of one kind of state over any backend.
pub struct StateAccessor<T> {
    storage: Arc<dyn Storage>,
    retry: RetryPolicy,
    _value: PhantomData<fn() -> T>,
}

impl<T: StateValue> StateAccessor<T> {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            retry: RetryPolicy::default(),
            _value: PhantomData,
        }
    }

    /// Create an accessor with the configured backoff.
    pub fn from_config(storage: Arc<dyn Storage>, config: &RetryConfig) -> Self {
        Self::new(storage).with_retry(RetryPolicy::from(config))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn load(&self, key: &str) -> Result<Option<Versioned<T>>, StorageError> {
        let Some(stored) = self.storage.read_one(key).await? else {
            return Ok(None);
        };
        Ok(Some(Versioned {
            value: decode(&stored.value)?,
            etag: stored.etag,
        }))
    }

    /// Write `value` under `etag` (`None` creates, `"*"` overwrites).
    pub async fn save(&self, key: &str, value: &T, etag: Option<&ETag>) -> Result<ETag, StorageError> {
        let entry = StateEntry::encode(value, etag.cloned())?;
        self.storage.write_one(key, entry).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.storage.delete_one(key).await
    }

    /// Apply `change` to the current value (or `None` if absent) and write
    /// the result conditionally, retrying on conflict.
    ///
    /// # Errors
    /// `StaleState` once `max_attempts` writes have lost their race.
    pub async fn update<F>(&self, key: &str, mut change: F) -> Result<Versioned<T>, StorageError>
    where
        F: FnMut(Option<T>) -> T + Send,
    {
        for attempt in 1..=self.retry.max_attempts {
            let (current, etag) = match self.load(key).await? {
                Some(versioned) => (Some(versioned.value), Some(versioned.etag)),
                None => (None, None),
            };
            let next = change(current);

            match self.save(key, &next, etag.as_ref()).await {
                Ok(etag) => return Ok(Versioned { value: next, etag }),
                Err(err) if err.is_precondition_failed() => {
                    tracing::debug!(key, attempt, "state changed underneath update, retrying");
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_after(attempt)).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }

        tracing::warn!(key, attempts = self.retry.max_attempts, "update gave up on stale state");
        Err(StorageError::StaleState {
            key: key.to_string(),
            attempts: self.retry.max_attempts,
        })
    }
}

impl<T> Clone for StateAccessor<T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            retry: self.retry,
            _value: PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::InMemoryStorage;
    use crate::domain::state::{encode, Conflict, StoredEntry};
    use crate::ports::WriteReport;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashMap};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TurnState {
        turn: u32,
    }

    impl StateValue for TurnState {
        const TYPE_NAME: &'static str = "turn_state";
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    /// Rejects every write as if another writer always got there first.
    struct AlwaysStale;

    #[async_trait]
    impl Storage for AlwaysStale {
        async fn read(&self, _keys: &[String]) -> Result<HashMap<String, StoredEntry>, StorageError> {
            Ok(HashMap::new())
        }

        async fn write(
            &self,
            changes: BTreeMap<String, StateEntry>,
        ) -> Result<WriteReport, StorageError> {
            let mut report = WriteReport::new();
            for key in changes.into_keys() {
                let conflict = Conflict::AlreadyExists {
                    current: ETag::new("elsewhere"),
                };
                let err = StorageError::precondition(&key, conflict);
                report.reject(key, err);
            }
            Ok(report)
        }

        async fn delete(&self, _keys: &[String]) -> Result<(), StorageError> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "always-stale"
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(40));
        assert_eq!(policy.delay_after(4), Duration::from_millis(50));
        assert_eq!(policy.delay_after(40), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let accessor = StateAccessor::<TurnState>::new(Arc::new(InMemoryStorage::new()));

        assert_eq!(accessor.load("conv/1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load() {
        let accessor = StateAccessor::<TurnState>::new(Arc::new(InMemoryStorage::new()));

        let etag = accessor
            .save("conv/1", &TurnState { turn: 3 }, None)
            .await
            .unwrap();
        let loaded = accessor.load("conv/1").await.unwrap().unwrap();

        assert_eq!(loaded.value, TurnState { turn: 3 });
        assert_eq!(loaded.etag, etag);
    }

    #[tokio::test]
    async fn load_of_other_type_is_deserialization_error() {
        let storage = InMemoryStorage::new();
        storage
            .write_one(
                "conv/1",
                StateEntry::new(encode(&serde_json::json!({"turn": 1})).unwrap()),
            )
            .await
            .unwrap();
        let accessor = StateAccessor::<TurnState>::new(Arc::new(storage));

        assert!(matches!(
            accessor.load("conv/1").await,
            Err(StorageError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn update_creates_then_increments() {
        let accessor = StateAccessor::<TurnState>::new(Arc::new(InMemoryStorage::new()));
        let bump = |current: Option<TurnState>| TurnState {
            turn: current.map_or(1, |s| s.turn + 1),
        };

        accessor.update("conv/1", bump).await.unwrap();
        let second = accessor.update("conv/1", bump).await.unwrap();

        assert_eq!(second.value.turn, 2);
        assert_eq!(second.etag.as_str(), "v2");
    }

    #[tokio::test]
    async fn concurrent_updates_are_not_lost() {
        let accessor = StateAccessor::<TurnState>::new(Arc::new(InMemoryStorage::new()))
            .with_retry(fast_retry(20));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let accessor = accessor.clone();
            handles.push(tokio::spawn(async move {
                accessor
                    .update("conv/race", |current: Option<TurnState>| TurnState {
                        turn: current.map_or(1, |s| s.turn + 1),
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let final_state = accessor.load("conv/race").await.unwrap().unwrap();
        assert_eq!(final_state.value.turn, 10);
    }

    #[tokio::test]
    async fn update_gives_up_with_stale_state() {
        let accessor = StateAccessor::<TurnState>::new(Arc::new(AlwaysStale))
            .with_retry(fast_retry(3));
        let mut calls = 0;

        let result = accessor
            .update("conv/1", |_| {
                calls += 1;
                TurnState { turn: 1 }
            })
            .await;

        assert_eq!(
            result,
            Err(StorageError::StaleState {
                key: "conv/1".to_string(),
                attempts: 3
            })
        );
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn configured_attempts_bound_update() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
        };
        let accessor = StateAccessor::<TurnState>::from_config(Arc::new(AlwaysStale), &config);

        let result = accessor.update("conv/1", |_| TurnState { turn: 1 }).await;

        assert!(matches!(
            result,
            Err(StorageError::StaleState { attempts: 2, .. })
        ));
    }
}
