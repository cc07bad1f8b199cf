//! Domain events recorded by the instance aggregate
//!
//! Events are drained and logged by the application services after each
//! transition; state-machine side effects themselves are explicit calls,
//! never event-driven.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::instance::InstanceId;
use crate::domain::process::{ProcessId, StepId};

/// An observable fact about an instance's lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A participant started a new instance
    InstanceStarted {
        instance_id: InstanceId,
        process_id: ProcessId,
        guest: bool,
        timestamp: DateTime<Utc>,
    },

    /// A step was submitted (or skipped) for an instance
    StepSubmitted {
        instance_id: InstanceId,
        step_id: StepId,
        skipped: bool,
        timestamp: DateTime<Utc>,
    },

    /// The instance satisfied its completion predicate
    InstanceCompleted {
        instance_id: InstanceId,
        timestamp: DateTime<Utc>,
    },

    /// A completed instance reverted to running after a submission deletion
    InstanceReverted {
        instance_id: InstanceId,
        timestamp: DateTime<Utc>,
    },

    /// The instance was aborted
    InstanceAborted {
        instance_id: InstanceId,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Log the event at debug level
    pub fn log(&self) {
        match self {
            DomainEvent::InstanceStarted {
                instance_id,
                process_id,
                guest,
                ..
            } => tracing::debug!(
                instance_id = %instance_id.0,
                process_id = %process_id.0,
                guest,
                "instance started"
            ),
            DomainEvent::StepSubmitted {
                instance_id,
                step_id,
                skipped,
                ..
            } => tracing::debug!(
                instance_id = %instance_id.0,
                step_id = %step_id.0,
                skipped,
                "step submitted"
            ),
            DomainEvent::InstanceCompleted { instance_id, .. } => {
                tracing::debug!(instance_id = %instance_id.0, "instance completed")
            }
            DomainEvent::InstanceReverted { instance_id, .. } => {
                tracing::debug!(instance_id = %instance_id.0, "instance reverted to running")
            }
            DomainEvent::InstanceAborted { instance_id, .. } => {
                tracing::debug!(instance_id = %instance_id.0, "instance aborted")
            }
        }
    }
}
