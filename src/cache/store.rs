//! Cache storage.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

pub const METRIC_CACHE_HIT: &str = "storefront_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "storefront_cache_miss_total";
pub const METRIC_CACHE_EVICT: &str = "storefront_cache_evict_total";
pub const METRIC_CACHE_ERROR: &str = "storefront_cache_error_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out")]
    Timeout,
}

/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(String),
    /// Every key starting with the given string.
    Prefix(String),
}

/// Key/value cache with per-entry expiry.
///
/// Expired and never-written keys are indistinguishable: both read as `None`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Returns the number of entries removed.
    async fn invalidate(&self, target: &Invalidation) -> Result<u64, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// In-process LRU cache bounded by entry count.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.capacity)),
        }
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let now = Instant::now();
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let displaced = rw_write(&self.entries, SOURCE, "set").push(key.to_string(), entry);
        if let Some((displaced_key, _)) = displaced
            && displaced_key != key
        {
            counter!(METRIC_CACHE_EVICT).increment(1);
        }
        Ok(())
    }

    async fn invalidate(&self, target: &Invalidation) -> Result<u64, CacheError> {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        let removed = match target {
            Invalidation::Key(key) => u64::from(entries.pop(key.as_str()).is_some()),
            Invalidation::Prefix(prefix) => {
                let doomed: Vec<String> = entries
                    .iter()
                    .filter(|(key, _)| key.starts_with(prefix.as_str()))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &doomed {
                    entries.pop(key.as_str());
                }
                doomed.len() as u64
            }
        };
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let _ = rw_read(&self.entries, SOURCE, "ping").cap();
        Ok(())
    }
}
