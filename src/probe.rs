//! End-to-end check of a configured backend.
//!
//! Walks one scratch key through create, read, conditional update, a stale
//! write that must be rejected, and delete.

use serde_json::json;
use uuid::Uuid;

use crate::domain::state::{encode, CodecError, ETag, StateEntry};
use crate::ports::{Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("probe step '{step}' misbehaved: {detail}")]
    Contract { step: &'static str, detail: String },
}

impl ProbeError {
    fn contract(step: &'static str, detail: impl Into<String>) -> Self {
        ProbeError::Contract {
            step,
            detail: detail.into(),
        }
    }
}

/// Versions observed during a successful probe.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub key: String,
    pub created: ETag,
    pub updated: ETag,
}

pub async fn run(storage: &dyn Storage) -> Result<ProbeReport, ProbeError> {
    let key = format!("probe/{}", Uuid::new_v4().simple());
    let backend = storage.backend_name();

    let created = storage
        .write_one(&key, StateEntry::new(encode(&json!({ "turn": 1 }))?))
        .await?;
    tracing::info!(backend, key = %key, etag = %created, "probe: created");

    let read_back = storage
        .read_one(&key)
        .await?
        .ok_or_else(|| ProbeError::contract("read", "entry missing after create"))?;
    if read_back.etag != created {
        return Err(ProbeError::contract(
            "read",
            format!("read {} but write issued {}", read_back.etag, created),
        ));
    }

    let updated = storage
        .write_one(
            &key,
            StateEntry::if_match(encode(&json!({ "turn": 2 }))?, created.clone()),
        )
        .await?;
    if updated == created {
        return Err(ProbeError::contract("update", "version did not change"));
    }
    tracing::info!(backend, key = %key, etag = %updated, "probe: updated");

    match storage
        .write_one(
            &key,
            StateEntry::if_match(encode(&json!({ "turn": 99 }))?, created.clone()),
        )
        .await
    {
        Err(err) if err.is_precondition_failed() => {
            tracing::info!(backend, key = %key, "probe: stale write rejected");
        }
        Err(err) => return Err(err.into()),
        Ok(etag) => {
            return Err(ProbeError::contract(
                "stale write",
                format!("write with stale version {} was accepted as {}", created, etag),
            ))
        }
    }

    storage.delete_one(&key).await?;
    if storage.read_one(&key).await?.is_some() {
        return Err(ProbeError::contract("delete", "entry still present"));
    }
    tracing::info!(backend, key = %key, "probe: deleted");

    Ok(ProbeReport {
        key,
        created,
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::{FileStorage, InMemoryStorage};
    use tempfile::TempDir;

    #[tokio::test]
    async fn probe_passes_on_memory_backend() {
        let storage = InMemoryStorage::new();

        let report = run(&storage).await.unwrap();

        assert_eq!(report.created.as_str(), "v1");
        assert_eq!(report.updated.as_str(), "v2");
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn probe_passes_on_file_backend() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();

        let report = run(&storage).await.unwrap();

        assert_ne!(report.created, report.updated);
    }
}
