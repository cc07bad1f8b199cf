//!
//! Procflow Server - HTTP surface for the process-instance engine
//!
//! This crate assembles the core engine behind an axum API and runs the
//! expiry sweeper alongside the listener.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

/// API module
pub mod api;

/// Cache store implementations
pub mod cache;

/// Configuration module
pub mod config;

/// Error module
pub mod error;

/// Server module
pub mod server;

// Re-export key types
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::ProcflowServer;

/// Run the server with the given configuration
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    init_logging(&config);

    let cache = cache::create_cache_store(&config.cache_url)?;
    let forms = Arc::new(procflow_core::domain::forms::memory::InMemoryFormsProvider::new());

    let server = ProcflowServer::new(config, cache, forms);
    server.run().await
}

/// Initialize logging
fn init_logging(config: &ServerConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    fmt().with_env_filter(filter).with_target(true).init();
}
