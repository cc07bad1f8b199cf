//! Guest credential manager
//!
//! Anonymous participants are identified solely by a bearer token issued
//! at instance start. The cache is the primary validation path with the
//! durable instance record as fallback; expiry drives both validation and
//! the sweeper.

use base64::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

use crate::{domain::cache::CacheStore, domain::instance::ProcessInstance, CoreError};

/// 48 random bytes, 384 bits of entropy
const TOKEN_BYTES: usize = 48;

/// Issues, validates, and revokes guest access tokens
pub struct GuestCredentialService {
    cache: Arc<dyn CacheStore>,
    ttl: chrono::Duration,
}

impl GuestCredentialService {
    /// Create a credential service with the given token lifetime
    pub fn new(cache: Arc<dyn CacheStore>, ttl: chrono::Duration) -> Self {
        Self { cache, ttl }
    }

    /// The configured token lifetime
    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    fn cache_key(instance: &ProcessInstance) -> String {
        format!("proc:guest:{}:token", instance.id.0)
    }

    /// Issue a guest token for the instance. Idempotent: an instance that
    /// already holds a live token keeps it unless `force` is set.
    pub async fn issue(
        &self,
        instance: &mut ProcessInstance,
        force: bool,
    ) -> Result<String, CoreError> {
        if !force {
            if let Some(existing) = &instance.access_token {
                if !instance.token_expired(Utc::now()) {
                    return Ok(existing.clone());
                }
            }
        }

        let token = generate_token();
        instance.set_guest_credentials(token.clone(), self.ttl);
        self.mirror_to_cache(instance, &token).await;
        debug!(instance_id = %instance.id.0, ttl_hours = self.ttl.num_hours(), "Issued guest token");
        Ok(token)
    }

    /// Validate a supplied token against the instance's credentials.
    ///
    /// Authenticated instances skip token checks entirely. On a cache miss
    /// the durable record is consulted before failing.
    pub async fn validate(
        &self,
        instance: &ProcessInstance,
        supplied: Option<&str>,
    ) -> Result<(), CoreError> {
        if !instance.is_guest() {
            return Ok(());
        }

        let supplied = supplied
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CoreError::Auth("token required".to_string()))?;

        if instance.token_expired(Utc::now()) {
            return Err(CoreError::Auth("token expired".to_string()));
        }

        // Cache first; fall back to the instance record when cold
        let cached = match self.cache.get(&Self::cache_key(instance)).await {
            Ok(value) => value.and_then(|v| v.as_str().map(|s| s.to_string())),
            Err(e) => {
                warn!(instance_id = %instance.id.0, error = %e, "Credential cache read failed");
                None
            }
        };

        let stored = match &cached {
            Some(token) => token.as_str(),
            None => instance
                .access_token
                .as_deref()
                .ok_or_else(|| CoreError::Auth("invalid token".to_string()))?,
        };

        if !constant_time_eq(stored.as_bytes(), supplied.as_bytes()) {
            return Err(CoreError::Auth("invalid token".to_string()));
        }

        Ok(())
    }

    /// Remove the instance's cached credential entry
    pub async fn revoke(&self, instance: &ProcessInstance) -> Result<(), CoreError> {
        self.cache.delete(&Self::cache_key(instance)).await
    }

    async fn mirror_to_cache(&self, instance: &ProcessInstance, token: &str) {
        let ttl = self
            .ttl
            .to_std()
            .unwrap_or(StdDuration::from_secs(24 * 3600));
        // Best effort: the instance record is the durable fallback
        if let Err(e) = self
            .cache
            .set(&Self::cache_key(instance), json!(token), Some(ttl))
            .await
        {
            warn!(instance_id = %instance.id.0, error = %e, "Credential cache write failed");
        }
    }
}

/// URL-safe token with at least 256 bits of randomness
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    base64::encode_config(bytes, URL_SAFE_NO_PAD)
}

/// Length-then-bytes comparison without early exit on mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
