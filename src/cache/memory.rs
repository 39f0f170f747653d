//! In-process TTL cache
//!
//! Used by the one-shot CLI and by tests. An entry is dropped when a lookup
//! finds it past its deadline, and once the map reaches the sweep threshold
//! every `set` also purges all expired entries. Deadlines use
//! `tokio::time::Instant` so a paused test clock controls expiry.

use super::{Cache, CacheError, CacheKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, (String, Instant)>>,
    sweep_threshold: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Purge expired entries on `set` once the map holds this many
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold;
        self
    }

    /// Number of stored entries, including expired ones not yet looked up
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        match entries.get(key) {
            Some((value, expires_at)) if now < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() >= self.sweep_threshold {
            let before = entries.len();
            entries.retain(|_, (_, expires_at)| *expires_at > now);
            log::debug!("Memory cache swept {} expired entries", before - entries.len());
        }

        entries.insert(key.clone(), (value, now + ttl));
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
