//! Configuration for the Procflow Server
//!
//! This module contains the configuration types and loading functionality.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::ServerResult;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// URL of the credential cache (`memory://local` or `redis://...`)
    #[serde(default = "default_cache_url")]
    pub cache_url: String,

    /// Guest token lifetime in hours
    #[serde(default = "default_guest_token_ttl_hours")]
    pub guest_token_ttl_hours: i64,

    /// Seconds between expiry sweeper passes
    #[serde(default = "default_sweeper_interval_secs")]
    pub sweeper_interval_secs: u64,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_cache_url() -> String {
    "memory://local".to_string()
}

fn default_guest_token_ttl_hours() -> i64 {
    24
}

fn default_sweeper_interval_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            cache_url: default_cache_url(),
            guest_token_ttl_hours: default_guest_token_ttl_hours(),
            sweeper_interval_secs: default_sweeper_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn load() -> ServerResult<Self> {
        let mut config = Self::default();

        if let Ok(port) = env::var("SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.port = port;
            } else {
                warn!("Invalid SERVER_PORT value: {}", port);
            }
        }

        if let Ok(host) = env::var("SERVER_HOST") {
            config.bind_address = host;
        }

        if let Ok(cache_url) = env::var("CACHE_URL") {
            config.cache_url = cache_url;
        }

        if let Ok(ttl) = env::var("GUEST_TOKEN_TTL_HOURS") {
            match ttl.parse::<i64>() {
                Ok(hours) if hours > 0 => config.guest_token_ttl_hours = hours,
                _ => warn!("Invalid GUEST_TOKEN_TTL_HOURS value: {}", ttl),
            }
        }

        if let Ok(interval) = env::var("SWEEPER_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(secs) if secs > 0 => config.sweeper_interval_secs = secs,
                _ => warn!("Invalid SWEEPER_INTERVAL_SECS value: {}", interval),
            }
        }

        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.log_level = log_level;
        }

        Ok(config)
    }

    /// Guest token lifetime as a chrono duration
    pub fn guest_token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.guest_token_ttl_hours)
    }

    /// Sweeper pass interval
    pub fn sweeper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweeper_interval_secs)
    }
}
