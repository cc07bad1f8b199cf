use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Value object: Process ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

/// Value object: Process Step ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

/// Value object: Owner/participant user ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl ProcessId {
    /// Generate a fresh process ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl StepId {
    /// Generate a fresh step ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

/// How an instance is allowed to move through the process steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Steps must be completed in strict ascending order
    Sequential,

    /// Steps may be completed in any order
    FreeFlow,
}

/// One stage of a process, bound to a form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStep {
    /// Unique identifier
    pub id: StepId,

    /// The step's data-collection form
    pub form_id: crate::domain::forms::FormId,

    /// Optional display title
    pub title: String,

    /// Position within the process; unique per process, meaningful in
    /// sequential mode, persisted in free-flow mode for display
    pub order: u32,

    /// Whether a participant may skip this step
    pub allow_skip: bool,
}

/// Aggregate: an owner-defined workflow template composed of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    /// Unique identifier
    pub id: ProcessId,

    /// Owning user
    pub owner: UserId,

    /// Human-readable title
    pub title: String,

    /// Execution mode; immutable once instances exist
    pub mode: ExecutionMode,

    /// Soft-disable flag; inactive processes cannot be started
    pub active: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// The steps of this process, kept sorted by ascending order
    pub steps: Vec<ProcessStep>,
}

impl Process {
    /// Create a new, active process with no steps
    pub fn new(owner: UserId, title: String, mode: ExecutionMode) -> Self {
        Self {
            id: ProcessId::new(),
            owner,
            title,
            mode,
            active: true,
            created_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    /// Whether the process runs in sequential mode
    #[inline]
    pub fn is_sequential(&self) -> bool {
        self.mode == ExecutionMode::Sequential
    }

    /// First step by ascending order
    pub fn first_step(&self) -> Option<&ProcessStep> {
        self.steps.iter().min_by_key(|s| s.order)
    }

    /// The next step with order strictly greater than the given order
    pub fn next_step_after(&self, order: u32) -> Option<&ProcessStep> {
        self.steps
            .iter()
            .filter(|s| s.order > order)
            .min_by_key(|s| s.order)
    }

    /// Look up a step of this process by ID
    pub fn step(&self, id: &StepId) -> Option<&ProcessStep> {
        self.steps.iter().find(|s| &s.id == id)
    }

    /// The full step-id set of this process
    pub fn step_ids(&self) -> HashSet<StepId> {
        self.steps.iter().map(|s| s.id.clone()).collect()
    }

    /// Completion predicate: every step has at least one submission
    pub fn all_steps_submitted(&self, submitted: &HashSet<StepId>) -> bool {
        self.steps.iter().all(|s| submitted.contains(&s.id))
    }

    /// Next free order value (max + 1, starting at 1)
    pub fn next_free_order(&self) -> u32 {
        self.steps.iter().map(|s| s.order).max().map_or(1, |m| m + 1)
    }

    /// Append a step, enforcing the `(process, order)` uniqueness invariant.
    /// A missing order gets the next free one.
    pub fn add_step(
        &mut self,
        form_id: crate::domain::forms::FormId,
        title: String,
        order: Option<u32>,
        allow_skip: bool,
    ) -> Result<StepId, CoreError> {
        let order = match order {
            Some(0) => {
                return Err(CoreError::Validation("order must be >= 1".to_string()));
            }
            Some(o) => {
                if self.steps.iter().any(|s| s.order == o) {
                    return Err(CoreError::Conflict(format!(
                        "a step with order {} already exists",
                        o
                    )));
                }
                o
            }
            None => self.next_free_order(),
        };

        let step = ProcessStep {
            id: StepId::new(),
            form_id,
            title,
            order,
            allow_skip,
        };
        let id = step.id.clone();
        self.steps.push(step);
        self.steps.sort_by_key(|s| s.order);
        Ok(id)
    }

    /// Remove a step by ID; errors if the step does not belong to this process
    pub fn remove_step(&mut self, id: &StepId) -> Result<ProcessStep, CoreError> {
        let pos = self
            .steps
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| CoreError::NotFound("Step".to_string()))?;
        Ok(self.steps.remove(pos))
    }
}
