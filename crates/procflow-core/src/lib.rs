//!
//! Procflow Core - process-instance execution engine
//!
//! This crate owns the domain models (processes, instances, submissions),
//! the repository and collaborator interfaces with their in-memory
//! implementations, and the application services that drive instances
//! through their lifecycle. The HTTP surface lives in `procflow-server`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - aggregates, value objects, repository traits
pub mod domain;

/// Application services - definition store, execution engine, credentials, sweeper
pub mod application;

/// Error types
pub mod error;

// Re-export key types
pub use error::CoreError;

pub use domain::cache::CacheStore;
pub use domain::forms::{Answer, FieldId, FieldType, FormField, FormId, FormsProvider, ResponseId, StepForm};
pub use domain::instance::{InstanceId, InstanceStatus, ProcessInstance};
pub use domain::process::{ExecutionMode, Process, ProcessId, ProcessStep, StepId, UserId};
pub use domain::repository::{
    InstanceRepository, ProcessFilter, ProcessRepository, SubmissionRepository,
};
pub use domain::submission::{StepSubmission, SubmissionId};

pub use application::credentials::GuestCredentialService;
pub use application::definition_service::{ProcessDefinitionService, StepSpec, StepUpdate};
pub use application::execution_service::{
    CurrentStepView, ProcessExecutionService, StartedInstance, StepStatusView, SubmitRequest,
};
pub use application::sweeper::{ExpirySweeper, SweepReport};
