use crate::{
    domain::forms::FormId,
    domain::process::{ExecutionMode, Process, ProcessId, StepId, UserId},
    domain::repository::{InstanceRepository, ProcessFilter, ProcessRepository},
    CoreError,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// One step of a process-creation request. A missing order gets the next
/// free value within the request.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    /// The step's data-collection form
    pub form_id: FormId,

    /// Optional display title
    #[serde(default)]
    pub title: String,

    /// Explicit position; duplicates within one request are rejected
    #[serde(default)]
    pub order: Option<u32>,

    /// Whether a participant may skip this step
    #[serde(default)]
    pub allow_skip: bool,
}

/// Fields of a step that can be changed while a process has no instances
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepUpdate {
    /// New display title
    pub title: Option<String>,

    /// New position; must stay unique within the process
    pub order: Option<u32>,

    /// New skip flag
    pub allow_skip: Option<bool>,
}

/// Service owning process and step definitions
///
/// Mutations are owner-only and are refused once the process has at least
/// one instance, which preserves the ordering contract those instances
/// were started against. Reads of active processes are public.
pub struct ProcessDefinitionService {
    process_repo: Arc<dyn ProcessRepository>,
    instance_repo: Arc<dyn InstanceRepository>,
}

impl ProcessDefinitionService {
    /// Create a new definition service
    pub fn new(
        process_repo: Arc<dyn ProcessRepository>,
        instance_repo: Arc<dyn InstanceRepository>,
    ) -> Self {
        Self {
            process_repo,
            instance_repo,
        }
    }

    /// Create a process with its initial steps
    pub async fn create_process(
        &self,
        owner: UserId,
        title: String,
        mode: ExecutionMode,
        steps: Vec<StepSpec>,
    ) -> Result<Process, CoreError> {
        if title.trim().is_empty() {
            return Err(CoreError::Validation("title must not be empty".to_string()));
        }

        let mut process = Process::new(owner, title, mode);
        for spec in steps {
            // add_step reports a duplicate explicit order as Conflict; at
            // creation time it is malformed input, not contention
            process
                .add_step(spec.form_id, spec.title, spec.order, spec.allow_skip)
                .map_err(|e| match e {
                    CoreError::Conflict(msg) => CoreError::Validation(msg),
                    other => other,
                })?;
        }

        self.process_repo.save(&process).await?;
        info!(process_id = %process.id.0, steps = process.steps.len(), "Created process");
        Ok(process)
    }

    /// Fetch a process by ID
    pub async fn get_process(&self, id: &ProcessId) -> Result<Process, CoreError> {
        self.process_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Process".to_string()))
    }

    /// Publicly visible listing: active processes, newest first
    pub async fn list_active(
        &self,
        mode: Option<ExecutionMode>,
        search: Option<String>,
    ) -> Result<Vec<Process>, CoreError> {
        self.process_repo
            .list(&ProcessFilter {
                active_only: true,
                mode,
                search,
            })
            .await
    }

    /// Soft-disable a process so no new instances can be started
    pub async fn close_process(
        &self,
        caller: &UserId,
        id: &ProcessId,
    ) -> Result<Process, CoreError> {
        let mut process = self.get_process(id).await?;
        self.check_owner(&process, caller)?;

        process.active = false;
        self.process_repo.save(&process).await?;
        info!(process_id = %process.id.0, "Closed process");
        Ok(process)
    }

    /// Delete a process; refused while instances reference it
    pub async fn delete_process(&self, caller: &UserId, id: &ProcessId) -> Result<(), CoreError> {
        let process = self.get_process(id).await?;
        self.check_owner(&process, caller)?;
        if self.instance_repo.has_instances(id).await? {
            return Err(CoreError::Conflict(
                "process has instances and cannot be deleted".to_string(),
            ));
        }

        self.process_repo.delete(id).await?;
        info!(process_id = %id.0, "Deleted process");
        Ok(())
    }

    /// Add a step to an existing process
    pub async fn add_step(
        &self,
        caller: &UserId,
        process_id: &ProcessId,
        spec: StepSpec,
    ) -> Result<Process, CoreError> {
        let mut process = self.mutable_process(caller, process_id).await?;
        process.add_step(spec.form_id, spec.title, spec.order, spec.allow_skip)?;
        self.process_repo.save(&process).await?;
        Ok(process)
    }

    /// Update a step's title, order, or skip flag
    pub async fn update_step(
        &self,
        caller: &UserId,
        process_id: &ProcessId,
        step_id: &StepId,
        update: StepUpdate,
    ) -> Result<Process, CoreError> {
        let mut process = self.mutable_process(caller, process_id).await?;

        if let Some(order) = update.order {
            if order == 0 {
                return Err(CoreError::Validation("order must be >= 1".to_string()));
            }
            if process
                .steps
                .iter()
                .any(|s| s.order == order && &s.id != step_id)
            {
                return Err(CoreError::Conflict(format!(
                    "a step with order {} already exists",
                    order
                )));
            }
        }

        let step = process
            .steps
            .iter_mut()
            .find(|s| &s.id == step_id)
            .ok_or_else(|| CoreError::NotFound("Step".to_string()))?;

        if let Some(title) = update.title {
            step.title = title;
        }
        if let Some(order) = update.order {
            step.order = order;
        }
        if let Some(allow_skip) = update.allow_skip {
            step.allow_skip = allow_skip;
        }
        process.steps.sort_by_key(|s| s.order);

        self.process_repo.save(&process).await?;
        Ok(process)
    }

    /// Remove a step from a process
    pub async fn remove_step(
        &self,
        caller: &UserId,
        process_id: &ProcessId,
        step_id: &StepId,
    ) -> Result<Process, CoreError> {
        let mut process = self.mutable_process(caller, process_id).await?;
        process.remove_step(step_id)?;
        self.process_repo.save(&process).await?;
        Ok(process)
    }

    /// Load a process for mutation: owner check plus the instances guard
    async fn mutable_process(
        &self,
        caller: &UserId,
        id: &ProcessId,
    ) -> Result<Process, CoreError> {
        let process = self.get_process(id).await?;
        self.check_owner(&process, caller)?;
        if self.instance_repo.has_instances(id).await? {
            return Err(CoreError::Conflict(
                "process has instances and cannot be modified".to_string(),
            ));
        }
        Ok(process)
    }

    fn check_owner(&self, process: &Process, caller: &UserId) -> Result<(), CoreError> {
        if &process.owner != caller {
            return Err(CoreError::Forbidden(
                "only the process owner may do this".to_string(),
            ));
        }
        Ok(())
    }
}
