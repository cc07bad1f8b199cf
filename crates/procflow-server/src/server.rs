//! The Procflow server
//!
//! Wires the core engine's repositories and services together and runs
//! the HTTP listener plus the expiry sweeper task.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use procflow_core::domain::forms::memory::InMemoryFormsProvider;
use procflow_core::domain::repository::memory::{
    InMemoryInstanceRepository, InMemoryProcessRepository, InMemorySubmissionRepository,
};
use procflow_core::{
    CacheStore, ExpirySweeper, FormsProvider, GuestCredentialService, ProcessDefinitionService,
    ProcessExecutionService,
};

use crate::config::ServerConfig;
use crate::error::ServerResult;

/// The assembled Procflow server
pub struct ProcflowServer {
    /// Server configuration
    pub config: ServerConfig,

    /// Process and step definition management
    pub definitions: Arc<ProcessDefinitionService>,

    /// Instance lifecycle operations
    pub execution: Arc<ProcessExecutionService>,

    /// Credential cache, exposed for health checks
    pub cache: Arc<dyn CacheStore>,

    /// Forms collaborator
    pub forms: Arc<dyn FormsProvider>,

    sweeper: Arc<ExpirySweeper>,
}

impl ProcflowServer {
    /// Assemble a server from its collaborators
    pub fn new(
        config: ServerConfig,
        cache: Arc<dyn CacheStore>,
        forms: Arc<dyn FormsProvider>,
    ) -> Self {
        let process_repo = Arc::new(InMemoryProcessRepository::new());
        let instance_repo = Arc::new(InMemoryInstanceRepository::new());
        let submission_repo = Arc::new(InMemorySubmissionRepository::new());

        let credentials = Arc::new(GuestCredentialService::new(
            cache.clone(),
            config.guest_token_ttl(),
        ));

        let definitions = Arc::new(ProcessDefinitionService::new(
            process_repo.clone(),
            instance_repo.clone(),
        ));
        let execution = Arc::new(ProcessExecutionService::new(
            process_repo,
            instance_repo.clone(),
            submission_repo.clone(),
            forms.clone(),
            credentials.clone(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            instance_repo,
            submission_repo,
            forms.clone(),
            credentials,
            config.sweeper_interval(),
        ));

        Self {
            config,
            definitions,
            execution,
            cache,
            forms,
            sweeper,
        }
    }

    /// Build a server with in-memory collaborators, used in tests
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(
            config,
            Arc::new(crate::cache::InMemoryCache::new()),
            Arc::new(InMemoryFormsProvider::new()),
        )
    }

    /// Run the HTTP listener and the sweeper until shutdown
    pub async fn run(self) -> ServerResult<()> {
        info!("Starting Procflow Server");

        let server = Arc::new(self);
        tokio::spawn(server.sweeper.clone().run());

        let app = crate::api::build_router(server.clone());
        let addr: SocketAddr = format!("{}:{}", server.config.bind_address, server.config.port)
            .parse()
            .map_err(|e| {
                crate::error::ServerError::ConfigurationError(format!(
                    "Invalid bind address: {}",
                    e
                ))
            })?;
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);

        axum::serve(listener, app).await?;
        Ok(())
    }
}
