use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::forms::ResponseId;
use crate::domain::instance::InstanceId;
use crate::domain::process::StepId;

/// Value object: Step Submission ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub String);

impl SubmissionId {
    /// Generate a fresh submission ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

/// The record that a given step was answered (or skipped) for an instance.
/// At most one exists per `(instance, step)` pair; immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSubmission {
    /// Unique identifier
    pub id: SubmissionId,

    /// Owning instance; cascade-deleted with it
    pub instance_id: InstanceId,

    /// The submitted step
    pub step_id: StepId,

    /// The recorded form response; absent for skipped steps
    pub response_id: Option<ResponseId>,

    /// Whether the step was skipped rather than answered
    pub skipped: bool,

    /// Creation timestamp
    pub submitted_at: DateTime<Utc>,
}

impl StepSubmission {
    /// Record an answered step
    pub fn answered(instance_id: InstanceId, step_id: StepId, response_id: ResponseId) -> Self {
        Self {
            id: SubmissionId::new(),
            instance_id,
            step_id,
            response_id: Some(response_id),
            skipped: false,
            submitted_at: Utc::now(),
        }
    }

    /// Record a skipped step; carries no answer payload
    pub fn skipped(instance_id: InstanceId, step_id: StepId) -> Self {
        Self {
            id: SubmissionId::new(),
            instance_id,
            step_id,
            response_id: None,
            skipped: true,
            submitted_at: Utc::now(),
        }
    }
}
