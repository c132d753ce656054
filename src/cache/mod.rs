//! Response cache. Implementations fail open: a failed `get` is a miss.

pub mod disk;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use disk::DiskCache;
pub use memory::MemoryCache;

use crate::model::Category;

/// Key/value store of serialized category payloads with per-entry expiry.
/// Expired and absent entries behave identically to the caller.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the payload only if an unexpired entry exists.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Upserts atomically per key: no reader observes a partial entry.
    async fn put(&self, key: &str, payload: Vec<u8>, ttl: Duration);

    /// Explicit removal, for when a provider reports authoritative data has
    /// changed.
    async fn invalidate(&self, key: &str);
}

/// Cache key for a symbol's data category. Provider-agnostic: the cached
/// value is the merged category payload, not a raw provider response.
pub fn cache_key(symbol: &str, category: Category) -> String {
    format!("{}:{}", symbol.to_uppercase(), category.as_str())
}
