use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CacheStore;

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    payload: Vec<u8>,
    fetched_at_ms: i64,
    ttl_ms: u64,
}

impl StoredEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.fetched_at_ms) >= self.ttl_ms as i64
    }
}

/// Durable key/value cache on top of a fjall keyspace. A single-key insert
/// is atomic, which is all the upsert contract requires.
pub struct DiskCache {
    _keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
}

impl DiskCache {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let keyspace = Arc::new(fjall::Config::new(dir).open()?);
        let partition =
            keyspace.open_partition("responses", PartitionCreateOptions::default())?;
        Ok(Self {
            _keyspace: keyspace,
            partition,
        })
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let result: Result<Option<Vec<u8>>> = (|| {
            let Some(raw) = self.partition.get(key)? else {
                debug!(key, "cache MISS");
                return Ok(None);
            };
            let entry: StoredEntry = serde_json::from_slice(&raw)?;
            if entry.is_expired(Utc::now().timestamp_millis()) {
                debug!(key, "cache entry expired");
                self.partition.remove(key)?;
                return Ok(None);
            }
            debug!(key, "cache HIT");
            Ok(Some(entry.payload))
        })();

        match result {
            Ok(value) => value,
            Err(e) => {
                // Fail open: an unreachable store is a miss, not an error.
                debug!(key, "cache get error: {e}");
                None
            }
        }
    }

    async fn put(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        let entry = StoredEntry {
            payload,
            fetched_at_ms: Utc::now().timestamp_millis(),
            ttl_ms: ttl.as_millis() as u64,
        };
        let result: Result<()> = (|| {
            self.partition.insert(key, serde_json::to_vec(&entry)?)?;
            debug!(key, "cache PUT");
            Ok(())
        })();
        if let Err(e) = result {
            debug!(key, "cache put error: {e}");
        }
    }

    async fn invalidate(&self, key: &str) {
        if let Err(e) = self.partition.remove(key) {
            debug!(key, "cache invalidate error: {e}");
        }
    }
}
