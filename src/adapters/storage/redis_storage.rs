//! Redis-backed storage for multi-instance deployments.
//!
//! Each key is a Redis hash with fields `etag`, `type`, `data`, `modified`.
//! Conditional writes run as a Lua script so the version check and the
//! update execute atomically on the server, whichever instance sends them.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::domain::state::{ETag, Precondition, StateEntry, StorageLimits, StoredEntry, TypedPayload};
use crate::ports::{validate_key, validate_value, Storage, StorageError, WriteReport};

/// Compare-and-swap on the `etag` field.
///
/// ARGV: mode (`absent` | `match` | `any`), expected etag, new etag,
/// type name, data, modified (unix millis).
const CAS_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'etag')
local mode = ARGV[1]
if mode == 'absent' and current then
  return {'conflict', current}
end
if mode == 'match' and current ~= ARGV[2] then
  return {'conflict', current or ''}
end
redis.call('HSET', KEYS[1], 'etag', ARGV[3], 'type', ARGV[4], 'data', ARGV[5], 'modified', ARGV[6])
return {'committed', ARGV[3]}
"#;

type HashRow = (Option<String>, Option<String>, Option<Vec<u8>>, Option<i64>);

/// Redis-backed storage for state entries.
#[derive(Clone)]
pub struct RedisStorage {
    conn: MultiplexedConnection,
    key_prefix: String,
    limits: StorageLimits,
    cas: Script,
}

impl RedisStorage {
    /// Create a storage over an established connection.
    pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>, limits: StorageLimits) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
            limits,
            cas: Script::new(CAS_SCRIPT),
        }
    }

    /// Connect using the Redis section of the configuration.
    pub async fn connect(config: &RedisConfig, limits: StorageLimits) -> Result<Self, StorageError> {
        let client = redis::Client::open(config.url.as_str()).map_err(StorageError::unavailable)?;
        let conn = tokio::time::timeout(config.timeout(), client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| StorageError::BackendUnavailable("timed out connecting to Redis".to_string()))?
            .map_err(StorageError::unavailable)?;

        tracing::info!(prefix = %config.key_prefix, "connected to Redis storage");
        Ok(Self::new(conn, config.key_prefix.clone(), limits))
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn parse_row(&self, key: &str, row: HashRow) -> Result<Option<StoredEntry>, StorageError> {
        let (etag, type_name, data, modified) = row;
        let Some(etag) = etag else {
            return Ok(None);
        };

        let corrupt = |reason: &str| StorageError::CorruptEntry {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let type_name = type_name.ok_or_else(|| corrupt("missing type field"))?;
        let data = data.ok_or_else(|| corrupt("missing data field"))?;
        let last_modified = modified
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| corrupt("missing or invalid modified field"))?;

        Ok(Some(StoredEntry {
            value: TypedPayload::new(type_name, data),
            etag: ETag::new(etag),
            last_modified,
        }))
    }

    async fn write_key(&self, key: &str, entry: StateEntry) -> Result<ETag, StorageError> {
        validate_key(key, self.limits.max_key_bytes)?;
        validate_value(key, &entry, self.limits.max_value_bytes)?;

        let precondition = entry.precondition();
        let (mode, expected) = match &precondition {
            Precondition::IfAbsent => ("absent", ""),
            Precondition::IfMatch(etag) => ("match", etag.as_str()),
            Precondition::Any => ("any", ""),
        };
        let etag = ETag::new(Uuid::new_v4().simple().to_string());

        let mut conn = self.conn.clone();
        let reply: Vec<String> = self
            .cas
            .key(self.redis_key(key))
            .arg(mode)
            .arg(expected)
            .arg(etag.as_str())
            .arg(&entry.value.type_name)
            .arg(&entry.value.data)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(StorageError::unavailable)?;

        match reply.first().map(String::as_str) {
            Some("committed") => {
                tracing::debug!(key, etag = %etag, "redis write committed");
                Ok(etag)
            }
            Some("conflict") => {
                let current = reply.get(1).filter(|tag| !tag.is_empty()).map(ETag::new);
                match precondition.check(current.as_ref()) {
                    Err(conflict) => {
                        tracing::debug!(key, %conflict, "redis write rejected");
                        Err(StorageError::precondition(key, conflict))
                    }
                    Ok(()) => Err(StorageError::BackendUnavailable(format!(
                        "script reported a conflict on '{}' that the stored version does not explain",
                        key
                    ))),
                }
            }
            _ => Err(StorageError::BackendUnavailable(format!(
                "unexpected script reply for '{}': {:?}",
                key, reply
            ))),
        }
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn read(&self, keys: &[String]) -> Result<HashMap<String, StoredEntry>, StorageError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        for key in keys {
            validate_key(key, self.limits.max_key_bytes)?;
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("HMGET")
                .arg(self.redis_key(key))
                .arg("etag")
                .arg("type")
                .arg("data")
                .arg("modified");
        }

        let mut conn = self.conn.clone();
        let rows: Vec<HashRow> = pipe
            .query_async(&mut conn)
            .await
            .map_err(StorageError::unavailable)?;

        let mut found = HashMap::new();
        for (key, row) in keys.iter().zip(rows) {
            if let Some(entry) = self.parse_row(key, row)? {
                found.insert(key.clone(), entry);
            }
        }
        Ok(found)
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
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            validate_key(key, self.limits.max_key_bytes)?;
        }
        let redis_keys: Vec<String> = keys.iter().map(|key| self.redis_key(key)).collect();

        let mut conn = self.conn.clone();
        conn.del::<_, ()>(redis_keys)
            .await
            .map_err(StorageError::unavailable)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
