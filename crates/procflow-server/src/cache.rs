//! Cache store implementations for the Procflow Server
//!
//! The credential manager talks to a [`CacheStore`]; this module provides
//! the deployable implementations. The in-memory store runs a periodic
//! cleanup task so abandoned entries do not accumulate between reads; the
//! Redis store (behind the `redis` feature) delegates TTL handling to the
//! server.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, info};

use procflow_core::{CacheStore, CoreError};

use crate::error::{ServerError, ServerResult};

/// Build a cache store from a URL.
///
/// `memory://...` gives the in-memory store; `redis://...` requires the
/// `redis` feature.
pub fn create_cache_store(cache_url: &str) -> ServerResult<Arc<dyn CacheStore>> {
    if cache_url.starts_with("memory://") {
        info!("Using in-memory credential cache");
        return Ok(Arc::new(InMemoryCache::new()));
    }

    if cache_url.starts_with("redis://") {
        #[cfg(feature = "redis")]
        {
            info!("Using Redis credential cache");
            return Ok(Arc::new(redis_store::RedisCache::new(cache_url)?));
        }
        #[cfg(not(feature = "redis"))]
        {
            return Err(ServerError::ConfigurationError(
                "Redis cache requested but the 'redis' feature is not enabled".to_string(),
            ));
        }
    }

    Err(ServerError::ConfigurationError(format!(
        "Unsupported cache URL: {}",
        cache_url
    )))
}

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Instant::now() >= expiry,
            None => false,
        }
    }
}

/// In-memory cache with a periodic expired-entry cleanup task
pub struct InMemoryCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Create the cache and spawn its cleanup task
    pub fn new() -> Self {
        let entries: Arc<DashMap<String, CacheEntry>> = Arc::new(DashMap::new());

        tokio::spawn({
            let entries = entries.clone();
            async move {
                Self::cleanup_task(entries).await;
            }
        });

        Self { entries }
    }

    async fn cleanup_task(entries: Arc<DashMap<String, CacheEntry>>) {
        let mut interval = time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired());
            let removed = before - entries.len();
            if removed > 0 {
                debug!(removed, "Removed expired cache entries");
            }
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
        // Entries may expire between cleanup passes; never serve those
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), CoreError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(feature = "redis")]
mod redis_store {
    use super::*;
    use redis::AsyncCommands;

    /// Redis-backed cache store
    pub struct RedisCache {
        client: redis::Client,
    }

    impl RedisCache {
        /// Create a client for the given Redis URL
        pub fn new(url: &str) -> ServerResult<Self> {
            let client = redis::Client::open(url).map_err(|e| {
                ServerError::ConfigurationError(format!("Invalid Redis URL: {}", e))
            })?;
            Ok(Self { client })
        }

        async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CoreError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| CoreError::StateStore(format!("Redis connection failed: {}", e)))
        }
    }

    #[async_trait]
    impl CacheStore for RedisCache {
        async fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
            let mut conn = self.connection().await?;
            let raw: Option<String> = conn
                .get(key)
                .await
                .map_err(|e| CoreError::StateStore(format!("Redis GET failed: {}", e)))?;
            match raw {
                Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
                None => Ok(None),
            }
        }

        async fn set(
            &self,
            key: &str,
            value: Value,
            ttl: Option<Duration>,
        ) -> Result<(), CoreError> {
            let mut conn = self.connection().await?;
            let raw = serde_json::to_string(&value)?;
            match ttl {
                Some(ttl) => conn
                    .set_ex(key, raw, ttl.as_secs() as usize)
                    .await
                    .map_err(|e| CoreError::StateStore(format!("Redis SETEX failed: {}", e))),
                None => conn
                    .set(key, raw)
                    .await
                    .map_err(|e| CoreError::StateStore(format!("Redis SET failed: {}", e))),
            }
        }

        async fn delete(&self, key: &str) -> Result<(), CoreError> {
            let mut conn = self.connection().await?;
            conn.del(key)
                .await
                .map_err(|e| CoreError::StateStore(format!("Redis DEL failed: {}", e)))
        }

        async fn health_check(&self) -> Result<bool, CoreError> {
            let mut conn = self.connection().await?;
            let pong: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| CoreError::StateStore(format!("Redis PING failed: {}", e)))?;
            Ok(pong == "PONG")
        }
    }
}

#[cfg(feature = "redis")]
pub use redis_store::RedisCache;
