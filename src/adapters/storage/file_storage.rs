//! File-based Storage Adapter
//!
//! Stores each key as one blob file under a root directory, the way an
//! object store keeps one blob per name. Several processes may share a root.
//!
//! ## Layout
//!
//! ```text
//! <root>/<escaped-key>.blob          JSON envelope: etag, type, modified, base64 data
//! <root>/<escaped-key>.lock          present while a writer holds the key
//! <root>/<escaped-key>.<uuid>.tmp    in-flight write, renamed over the blob
//! <root>/<escaped-key>.<uuid>.stale  lock being reclaimed from a dead writer
//! ```
//!
//! Escaped names never contain `.`, so the three kinds of file cannot collide.
//!
//! ## Consistency
//!
//! Writers serialize on the lock file (created with `create_new`, which is
//! atomic across processes) and commit by renaming a fully written temp file
//! over the blob. Readers take no lock and see either the previous blob or
//! the new one, never a partial write.
//!
//! A lock file records the owning pid and acquisition time. A lock older
//! than `stale_lock` is treated as abandoned by a crashed writer: it is
//! renamed aside (so only one waiter reclaims it) and the waiter retries.
//!
//! A write cancelled after the rename has committed; one cancelled before it
//! has not. Callers cannot tell which, so they re-read.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::state::{escape_key, ETag, StateEntry, StorageLimits, StoredEntry, TypedPayload};
use crate::ports::{validate_key, validate_value, Storage, StorageError, WriteReport};

/// Longest escaped name accepted, leaving room for suffixes within the
/// usual 255-byte file name limit.
pub const MAX_BLOB_NAME_BYTES: usize = 200;

/// Tuning for lock acquisition and size limits.
#[derive(Debug, Clone)]
pub struct FileStorageOptions {
    /// How long a writer waits for another writer's lock.
    pub lock_timeout: Duration,
    /// Pause between lock attempts.
    pub lock_retry: Duration,
    /// Age after which a held lock is considered abandoned.
    pub stale_lock: Duration,
    pub limits: StorageLimits,
}

impl Default for FileStorageOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(2),
            lock_retry: Duration::from_millis(5),
            stale_lock: Duration::from_secs(30),
            limits: StorageLimits::default(),
        }
    }
}

impl FileStorageOptions {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_stale_lock(mut self, age: Duration) -> Self {
        self.stale_lock = age;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BlobEnvelope {
    etag: ETag,
    content_type: String,
    last_modified: DateTime<Utc>,
    data: String,
}

/// Contents of a lock file, for whoever finds it abandoned.
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held while a writer owns a key. Dropping it releases the key, including
/// when the owning future is cancelled.
struct BlobLock {
    path: PathBuf,
}

impl Drop for BlobLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to release key lock"
                );
            }
        }
    }
}

/// File-based storage for state entries
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    options: FileStorageOptions,
}

impl FileStorage {
    /// Open (creating if needed) a storage root with default options
    ///
    /// # Example
    /// ```ignore
    /// let storage = FileStorage::open("./data/state").await?;
    /// ```
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        Self::open_with_options(root, FileStorageOptions::default()).await
    }

    /// Open (creating if needed) a storage root
    pub async fn open_with_options<P: AsRef<Path>>(
        root: P,
        options: FileStorageOptions,
    ) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .await
            .map_err(StorageError::unavailable)?;
        tracing::info!(root = %root.display(), "file storage opened");
        Ok(Self { root, options })
    }

    /// Map a logical key to its blob name
    fn blob_name(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key, self.options.limits.max_key_bytes)?;
        let name = escape_key(key);
        if name.len() > MAX_BLOB_NAME_BYTES {
            return Err(StorageError::KeyTooLarge {
                len: name.len(),
                max: MAX_BLOB_NAME_BYTES,
            });
        }
        Ok(name)
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.blob", name))
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.lock", name))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}.tmp", name, Uuid::new_v4().simple()))
    }

    fn stale_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}.stale", name, Uuid::new_v4().simple()))
    }

    /// Wait for exclusive ownership of a key
    async fn lock(&self, key: &str, name: &str) -> Result<BlobLock, StorageError> {
        let path = self.lock_path(name);
        let deadline = Instant::now() + self.options.lock_timeout;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let lock = BlobLock { path };
                    let owner = LockOwner {
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    let bytes = serde_json::to_vec(&owner)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    file.write_all(&bytes)
                        .await
                        .map_err(StorageError::unavailable)?;
                    file.flush().await.map_err(StorageError::unavailable)?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.reclaim_if_stale(key, name, &path).await? {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(StorageError::BackendUnavailable(format!(
                            "timed out waiting for lock on key '{}'",
                            key
                        )));
                    }
                    tokio::time::sleep(self.options.lock_retry).await;
                }
                Err(e) => return Err(StorageError::unavailable(e)),
            }
        }
    }

    /// Age of a lock file, or `None` once it is gone
    async fn lock_age(path: &Path) -> Result<Option<Duration>, StorageError> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::unavailable(e)),
        };
        let modified = metadata.modified().map_err(StorageError::unavailable)?;
        Ok(Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        ))
    }

    /// Break a lock abandoned by a dead writer. Returns true when the caller
    /// should retry at once.
    async fn reclaim_if_stale(
        &self,
        key: &str,
        name: &str,
        path: &Path,
    ) -> Result<bool, StorageError> {
        match Self::lock_age(path).await? {
            None => return Ok(true),
            Some(age) if age < self.options.stale_lock => return Ok(false),
            Some(_) => {}
        }

        let aside = self.stale_path(name);
        match fs::rename(path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(StorageError::unavailable(e)),
        }

        // The lock may have been replaced between the age check and the rename.
        let still_stale = matches!(
            Self::lock_age(&aside).await?,
            Some(age) if age >= self.options.stale_lock
        );
        if !still_stale {
            if let Err(e) = fs::hard_link(&aside, path).await {
                tracing::warn!(key, error = %e, "failed to restore live key lock");
            }
            let _ = fs::remove_file(&aside).await;
            return Ok(false);
        }

        let owner = fs::read(&aside).await.unwrap_or_default();
        tracing::warn!(
            key,
            owner = %String::from_utf8_lossy(&owner),
            "reclaimed stale key lock"
        );
        if let Err(e) = fs::remove_file(&aside).await {
            tracing::warn!(key, error = %e, "failed to remove reclaimed lock");
        }
        Ok(true)
    }

    /// Load a blob if it exists
    async fn load(&self, key: &str, name: &str) -> Result<Option<StoredEntry>, StorageError> {
        let bytes = match fs::read(self.blob_path(name)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::unavailable(e)),
        };

        let corrupt = |reason: String| StorageError::CorruptEntry {
            key: key.to_string(),
            reason,
        };
        let envelope: BlobEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        let data = STANDARD
            .decode(envelope.data.as_bytes())
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(Some(StoredEntry {
            value: TypedPayload::new(envelope.content_type, data),
            etag: envelope.etag,
            last_modified: envelope.last_modified,
        }))
    }

    /// Write a temp file and rename it over the blob
    async fn commit(&self, name: &str, envelope: &BlobEnvelope) -> Result<(), StorageError> {
        let bytes =
            serde_json::to_vec(envelope).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let temp = self.temp_path(name);

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&temp, self.blob_path(name)).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(StorageError::unavailable(e));
        }
        Ok(())
    }

    async fn write_key(&self, key: &str, entry: StateEntry) -> Result<ETag, StorageError> {
        let name = self.blob_name(key)?;
        validate_value(key, &entry, self.options.limits.max_value_bytes)?;

        let _lock = self.lock(key, &name).await?;

        let current = self.load(key, &name).await?;
        entry
            .precondition()
            .check(current.as_ref().map(|stored| &stored.etag))
            .map_err(|conflict| {
                tracing::debug!(key, %conflict, "file write rejected");
                StorageError::precondition(key, conflict)
            })?;

        let etag = ETag::new(Uuid::new_v4().simple().to_string());
        let envelope = BlobEnvelope {
            etag: etag.clone(),
            content_type: entry.value.type_name,
            last_modified: Utc::now(),
            data: STANDARD.encode(&entry.value.data),
        };
        self.commit(&name, &envelope).await?;

        tracing::debug!(key, etag = %etag, "file write committed");
        Ok(etag)
    }

    async fn delete_key(&self, key: &str) -> Result<(), StorageError> {
        let name = self.blob_name(key)?;
        let _lock = self.lock(key, &name).await?;

        match fs::remove_file(self.blob_path(&name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::unavailable(e)),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoredEntry>, StorageError> {
        let loads = keys.iter().map(|key| async move {
            let name = self.blob_name(key)?;
            let entry = self.load(key, &name).await?;
            Ok::<_, StorageError>(entry.map(|entry| (key.clone(), entry)))
        });

        Ok(try_join_all(loads).await?.into_iter().flatten().collect())
    }

    async fn write(
        &self,
        changes: BTreeMap<String, StateEntry>,
    ) -> Result<WriteReport, StorageError> {
        let mut report = WriteReport::new();
        for (key, entry) in changes {
            let outcome = self.write_key(&key, entry).await;
            report.record(key, outcome);
        }
        Ok(report)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.delete_key(key).await?;
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::{decode, encode, StateValue};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TurnState {
        turn: u32,
    }

    impl StateValue for TurnState {
        const TYPE_NAME: &'static str = "turn_state";
    }

    fn turn(n: u32) -> TypedPayload {
        encode(&TurnState { turn: n }).unwrap()
    }

    #[tokio::test]
    async fn test_file_storage_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();

        let etag = storage
            .write_one("msteams/conversations/1", StateEntry::new(turn(1)))
            .await
            .unwrap();
        let loaded = storage
            .read_one("msteams/conversations/1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(loaded.etag, etag);
        assert_eq!(decode::<TurnState>(&loaded.value).unwrap().turn, 1);
    }

    #[tokio::test]
    async fn test_file_storage_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();

        let result = storage.read(&["missing".to_string()]).await.unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_file_storage_update_requires_current_etag() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();

        let v1 = storage.write_one("k", StateEntry::new(turn(1))).await.unwrap();
        let v2 = storage
            .write_one("k", StateEntry::if_match(turn(2), v1.clone()))
            .await
            .unwrap();
        let stale = storage
            .write_one("k", StateEntry::if_match(turn(3), v1.clone()))
            .await;

        assert_ne!(v1, v2);
        assert!(matches!(
            stale,
            Err(StorageError::PreconditionFailed { .. })
        ));
        let loaded = storage.read_one("k").await.unwrap().unwrap();
        assert_eq!(decode::<TurnState>(&loaded.value).unwrap().turn, 2);
    }

    #[tokio::test]
    async fn test_file_storage_blob_layout() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();

        storage.write_one("conv/42", StateEntry::new(turn(1))).await.unwrap();

        assert!(temp_dir.path().join("conv%2F42.blob").exists());
        assert!(!temp_dir.path().join("conv%2F42.lock").exists());
    }

    #[tokio::test]
    async fn test_file_storage_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();
        storage.write_one("k", StateEntry::new(turn(1))).await.unwrap();

        storage.delete_one("k").await.unwrap();
        storage.delete_one("k").await.unwrap();

        assert!(storage.read_one("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_instances_share_root() {
        let temp_dir = TempDir::new().unwrap();
        let first = FileStorage::open(temp_dir.path()).await.unwrap();
        let second = FileStorage::open(temp_dir.path()).await.unwrap();

        let etag = first.write_one("shared", StateEntry::new(turn(7))).await.unwrap();
        let seen = second.read_one("shared").await.unwrap().unwrap();

        assert_eq!(seen.etag, etag);
    }

    #[tokio::test]
    async fn test_file_storage_held_lock_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let options = FileStorageOptions::default().with_lock_timeout(Duration::from_millis(30));
        let storage = FileStorage::open_with_options(temp_dir.path(), options)
            .await
            .unwrap();
        std::fs::write(temp_dir.path().join("busy.lock"), b"").unwrap();

        let result = storage.write_one("busy", StateEntry::new(turn(1))).await;

        assert!(matches!(result, Err(StorageError::BackendUnavailable(_))));
    }

    fn plant_lock(path: &Path, age: Duration) {
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_file_storage_reclaims_abandoned_lock() {
        let temp_dir = TempDir::new().unwrap();
        let options = FileStorageOptions::default()
            .with_lock_timeout(Duration::from_millis(100))
            .with_stale_lock(Duration::from_secs(60));
        let first = FileStorage::open_with_options(temp_dir.path(), options.clone())
            .await
            .unwrap();
        let second = FileStorage::open_with_options(temp_dir.path(), options)
            .await
            .unwrap();
        plant_lock(&temp_dir.path().join("conv%2F42.lock"), Duration::from_secs(3600));

        let etag = first
            .write_one("conv/42", StateEntry::new(turn(1)))
            .await
            .unwrap();
        plant_lock(&temp_dir.path().join("conv%2F42.lock"), Duration::from_secs(3600));
        second.delete_one("conv/42").await.unwrap();

        assert!(!etag.is_empty());
        assert!(second.read_one("conv/42").await.unwrap().is_none());
        let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_file_storage_recent_lock_is_not_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let options = FileStorageOptions::default()
            .with_lock_timeout(Duration::from_millis(30))
            .with_stale_lock(Duration::from_secs(60));
        let storage = FileStorage::open_with_options(temp_dir.path(), options)
            .await
            .unwrap();
        plant_lock(&temp_dir.path().join("busy.lock"), Duration::from_secs(5));

        let result = storage.write_one("busy", StateEntry::new(turn(1))).await;

        assert!(matches!(result, Err(StorageError::BackendUnavailable(_))));
        assert!(temp_dir.path().join("busy.lock").exists());
    }

    #[tokio::test]
    async fn test_file_storage_lock_records_owner() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();

        let lock = storage.lock("k", "k").await.unwrap();
        let owner: LockOwner =
            serde_json::from_slice(&std::fs::read(temp_dir.path().join("k.lock")).unwrap())
                .unwrap();
        drop(lock);

        assert_eq!(owner.pid, std::process::id());
        assert!(!temp_dir.path().join("k.lock").exists());
    }

    #[tokio::test]
    async fn test_file_storage_corrupt_blob() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();
        std::fs::write(temp_dir.path().join("broken.blob"), b"not json").unwrap();

        let result = storage.read_one("broken").await;

        assert!(matches!(result, Err(StorageError::CorruptEntry { .. })));
    }

    #[tokio::test]
    async fn test_file_storage_rejects_long_escaped_names() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::open(temp_dir.path()).await.unwrap();
        // 100 slashes escape to 300 bytes.
        let key = "/".repeat(100);

        let result = storage.write_one(&key, StateEntry::new(turn(1))).await;

        assert!(matches!(
            result,
            Err(StorageError::KeyTooLarge { len: 300, .. })
        ));
    }
}
