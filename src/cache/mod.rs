//! Catalog cache.
//!
//! A [`CacheStore`] holds serialized JSON payloads under string keys with a
//! per-entry TTL. The cache is never authoritative: callers treat any error as
//! a miss and fall back to the store.
//!
//! ```toml
//! [cache]
//! capacity = 1024
//! ttl_seconds = 900
//! ```

mod config;
pub mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use store::{
    CacheError, CacheStore, Invalidation, METRIC_CACHE_ERROR, METRIC_CACHE_EVICT,
    METRIC_CACHE_HIT, METRIC_CACHE_MISS, MemoryCacheStore,
};
