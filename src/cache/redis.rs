//! Redis shared tier (feature `redis-backend`).

use super::backend::CacheBackend;
use crate::{Error, Result};
use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use std::time::Duration;

/// Shared durable tier backed by Redis.
///
/// Exposes key enumeration (`KEYS`), so pattern invalidation covers this tier
/// as well as the fast tier. All calls are placed under the store's bounded
/// timeout by [`CacheStore`](super::CacheStore); this type itself never
/// retries.
pub struct RedisBackend {
    client: RedisClient,
}

impl RedisBackend {
    /// Connect configuration only; no I/O happens until the first operation.
    pub fn new(url: &str) -> Result<Self> {
        let client = RedisClient::open(url)
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(removed > 0)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn
            .keys("*")
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(keys)
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let size: i64 = redis::cmd("DBSIZE")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(size.max(0) as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::backend_unavailable("redis", e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
