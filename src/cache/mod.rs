//! Key-shaped TTL cache for dividend lookups
//!
//! Entries are only ever written after a successful ledger read
//! (read-through). Nothing invalidates explicitly; coherence across the
//! exact / partition / global shapes comes from TTL expiry alone.

pub mod memory;
pub mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

use crate::config::{CacheBackend, ServiceConfig};
use crate::ledger::{Hotkey, Netuid, Snapshot};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub enum CacheError {
    Backend(String),
    Serialization(serde_json::Error),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err)
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Backend(e) => write!(f, "Cache backend error: {}", e),
            CacheError::Serialization(e) => write!(f, "Cache serialization error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

/// Tagged cache key
///
/// The three dividend shapes never alias each other: a partition total for
/// netuid 1 and the exact entry for (1, hotkey) are distinct variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Single (netuid, hotkey) dividend
    Exact { netuid: Netuid, hotkey: Hotkey },
    /// Sum over every hotkey in one partition
    Partition { netuid: Netuid },
    /// Sum over every partition
    Global,
    /// `TotalNetworks` partition count
    TotalPartitions,
}

impl CacheKey {
    /// Key string used by shared key-value backends
    pub fn redis_key(&self) -> String {
        match self {
            CacheKey::Exact { netuid, hotkey } => format!("tao_dividends:{}:{}", netuid, hotkey),
            CacheKey::Partition { netuid } => format!("tao_dividends:{}:*", netuid),
            CacheKey::Global => "tao_dividends:*:*".to_string(),
            CacheKey::TotalPartitions => "total_networks".to_string(),
        }
    }
}

/// Cached dividend value together with the snapshot it was read at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDividend {
    pub value: f64,
    #[serde(rename = "asOf")]
    pub as_of: Snapshot,
}

/// Shared key-value store with expiry
///
/// Values are opaque JSON strings; use [`get_json`] / [`set_json`] for
/// typed access.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &CacheKey,
) -> Result<Option<T>, CacheError> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    key: &CacheKey,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, raw, ttl).await
}

/// Build the configured cache backend
pub async fn from_config(config: &ServiceConfig) -> Result<Arc<dyn Cache>, CacheError> {
    match config.cache_backend {
        CacheBackend::Redis => {
            let url = config.redis_url();
            let cache = RedisCache::connect(&url).await?;
            log::info!("✅ Connected to Redis cache at {}", url);
            Ok(Arc::new(cache))
        }
        CacheBackend::Memory => {
            log::info!("✅ Using in-process memory cache");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}
