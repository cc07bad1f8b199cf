//! Cache collaborator interface
//!
//! The credential manager uses a fast key-value cache with TTL as its
//! primary check path; the durable instance record is the fallback. The
//! cache is an injected collaborator with a lifecycle owned by the process
//! runtime, never a hidden singleton, so tests can swap in an in-memory
//! fake deterministically.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::CoreError;

/// A best-effort key-value cache with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a value; absent and expired entries both return `None`
    async fn get(&self, key: &str) -> Result<Option<Value>, CoreError>;

    /// Store a value, optionally with a TTL
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>)
        -> Result<(), CoreError>;

    /// Remove a value
    async fn delete(&self, key: &str) -> Result<(), CoreError>;

    /// Health check
    async fn health_check(&self) -> Result<bool, CoreError> {
        Ok(true)
    }
}

/// In-memory cache for testing; entries expire lazily on read
pub mod memory {
    use super::*;
    use dashmap::DashMap;
    use std::time::Instant;

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

    /// In-memory implementation of [`CacheStore`]
    #[derive(Default)]
    pub struct InMemoryCacheStore {
        entries: DashMap<String, CacheEntry>,
    }

    impl InMemoryCacheStore {
        /// Create an empty cache
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl CacheStore for InMemoryCacheStore {
        async fn get(&self, key: &str) -> Result<Option<Value>, CoreError> {
            // The shard guard must be released before removing the entry
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
                    expires_at: ttl.map(|t| Instant::now() + t),
                },
            );
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CoreError> {
            self.entries.remove(key);
            Ok(())
        }
    }
}
