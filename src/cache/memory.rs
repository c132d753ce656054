use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::CacheStore;

struct CacheValue {
    payload: Vec<u8>,
    expires_at: Instant,
}

pub struct MemoryCache {
    inner: Arc<Mutex<HashMap<String, CacheValue>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let cache = self.inner.lock().await;
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!(key, "cache HIT");
                Some(entry.payload.clone())
            }
            Some(_) => {
                debug!(key, "cache entry expired");
                None
            }
            None => {
                debug!(key, "cache MISS");
                None
            }
        }
    }

    async fn put(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        let value = CacheValue {
            payload,
            expires_at: Instant::now() + ttl,
        };
        let mut cache = self.inner.lock().await;
        debug!(key, "cache PUT");
        cache.insert(key.to_string(), value);
    }

    async fn invalidate(&self, key: &str) {
        let mut cache = self.inner.lock().await;
        cache.remove(key);
        debug!(key, "cache REMOVE");
    }
}
