//! ExchangeLock - at-most-once execution keyed by a dedup marker.
//!
//! A caller claims a key by writing an [`ExchangeMarker`] with create-if-absent
//! semantics. Exactly one of any number of concurrent claimants succeeds, on
//! any backend and across instances sharing that backend; the rest observe
//! `AlreadyClaimed` and skip the work.
//!
//! ## How It Works
//!
//! 1. Claim: conditional create of the marker
//! 2. If already claimed: skip and return `Exclusive::Skipped`
//! 3. If claimed: run the work
//! 4. Afterwards: keep or delete the marker according to [`RetentionPolicy`]
//!
//! ## Error Handling
//!
//! - Storage failures while claiming are propagated; the work does not run
//! - A failed release is propagated unless the work itself failed, in which
//!   case the work error wins and the release failure is logged

use std::future::Future;
use std::sync::Arc;

use crate::config::ExchangeConfig;
use crate::domain::exchange::{ExchangeMarker, RetentionPolicy};
use crate::domain::state::{ETag, StateEntry};
use crate::ports::{Storage, StorageError};

/// Proof of ownership of a dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeClaim {
    pub key: String,
    /// Version of the marker written by this claim.
    pub etag: ETag,
}

/// Result of trying to claim a dedup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller owns the key.
    Acquired(ExchangeClaim),
    /// Another caller claimed the key first.
    AlreadyClaimed,
}

/// Result of [`ExchangeLock::run_exclusive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusive<R> {
    /// The work ran in this caller.
    Ran(R),
    /// Another caller owns the key; the work did not run here.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum ExclusiveError<E> {
    #[error(transparent)]
    Storage(StorageError),

    #[error("exclusive work failed: {0}")]
    Work(E),
}

/// Dedup helper over any [`Storage`] backend.
#[derive(Clone)]
pub struct ExchangeLock {
    storage: Arc<dyn Storage>,
    policy: RetentionPolicy,
}

impl ExchangeLock {
    /// Create a lock with the default retention policy.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            policy: RetentionPolicy::default(),
        }
    }

    /// Create a lock with the configured retention policy.
    pub fn from_config(storage: Arc<dyn Storage>, config: &ExchangeConfig) -> Self {
        Self::new(storage).with_policy(config.retention)
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Claim `key` by creating its marker.
    pub async fn try_claim(
        &self,
        key: &str,
        marker: &ExchangeMarker,
    ) -> Result<ClaimOutcome, StorageError> {
        let entry = StateEntry::encode(marker, None)?;

        match self.storage.write_one(key, entry).await {
            Ok(etag) => {
                tracing::debug!(key, exchange_id = %marker.exchange_id, "exchange claimed");
                Ok(ClaimOutcome::Acquired(ExchangeClaim {
                    key: key.to_string(),
                    etag,
                }))
            }
            Err(err) if err.is_precondition_failed() => {
                tracing::debug!(key, exchange_id = %marker.exchange_id, "exchange already claimed");
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(err) => Err(err),
        }
    }

    /// Delete the marker, letting the key be claimed again.
    pub async fn release(&self, claim: ExchangeClaim) -> Result<(), StorageError> {
        self.storage.delete_one(&claim.key).await?;
        tracing::debug!(key = %claim.key, "exchange released");
        Ok(())
    }

    /// Run `work` only if this caller wins the claim on `key`.
    pub async fn run_exclusive<F, Fut, R, E>(
        &self,
        key: &str,
        marker: &ExchangeMarker,
        work: F,
    ) -> Result<Exclusive<R>, ExclusiveError<E>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<R, E>> + Send,
        R: Send,
        E: Send,
    {
        let claim = match self
            .try_claim(key, marker)
            .await
            .map_err(ExclusiveError::Storage)?
        {
            ClaimOutcome::Acquired(claim) => claim,
            ClaimOutcome::AlreadyClaimed => return Ok(Exclusive::Skipped),
        };

        let outcome = work().await;

        if self.policy.releases_after(outcome.is_ok()) {
            if let Err(err) = self.release(claim).await {
                if outcome.is_ok() {
                    return Err(ExclusiveError::Storage(err));
                }
                tracing::warn!(key, error = %err, "failed to release marker after failed work");
            }
        }

        outcome.map(Exclusive::Ran).map_err(ExclusiveError::Work)
    }
}

impl std::fmt::Debug for ExchangeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeLock")
            .field("backend", &self.storage.backend_name())
            .field("policy", &self.policy)
            .finish()
    }
}
