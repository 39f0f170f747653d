//! Redis-backed shared cache
//!
//! `GET key` / `SET key value EX ttl` over a multiplexed async connection.
//! Redis owns expiry, so several service instances stay coherent without
//! any in-process locking.

use super::{Cache, CacheError, CacheKey};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect and verify the server answers `PING`
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        if url.trim().is_empty() {
            return Err(CacheError::Backend("redis url is empty".to_string()));
        }

        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        log::debug!("Redis answered {} at {}", pong, url);

        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key.redis_key())
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // EX 0 is rejected by Redis
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = redis::cmd("SET")
            .arg(key.redis_key())
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "redis"
    }
}
