use crate::{
    application::credentials::GuestCredentialService,
    domain::forms::{Answer, FormsProvider, StepForm},
    domain::instance::{InstanceId, InstanceStatus, ProcessInstance},
    domain::process::{Process, ProcessId, ProcessStep, StepId, UserId},
    domain::repository::{InstanceRepository, ProcessRepository, SubmissionRepository},
    domain::submission::{StepSubmission, SubmissionId},
    CoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of starting an instance. The access token appears here and
/// nowhere else; instance payloads never carry it.
#[derive(Debug, Clone, Serialize)]
pub struct StartedInstance {
    /// The freshly created instance
    pub instance: ProcessInstance,

    /// Guest bearer token; absent for authenticated starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// A step submission request
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    /// The target step
    pub step_id: StepId,

    /// Answers for the step's form; ignored when skipping
    #[serde(default)]
    pub answers: Vec<Answer>,

    /// Skip the step instead of answering it
    #[serde(default)]
    pub skip: bool,

    /// Guest bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Form access password
    #[serde(default)]
    pub password: Option<String>,
}

/// The sequential view: the step the participant must answer next
#[derive(Debug, Clone, Serialize)]
pub struct CurrentStepView {
    /// The current step, `None` once the instance is finished
    pub step: Option<ProcessStep>,

    /// The current step's form
    pub form: Option<StepForm>,

    /// Instance status
    pub status: InstanceStatus,
}

/// One entry of the free-flow view
#[derive(Debug, Clone, Serialize)]
pub struct StepStatusView {
    /// The step
    pub step: ProcessStep,

    /// Whether this instance already has a submission for it
    pub is_submitted: bool,
}

/// Drives instances through their lifecycle: start, submit, delete
/// submission, abort. Every instance mutation happens under the
/// repository's per-instance row lock so concurrent submits against the
/// same instance serialize; submits across instances are independent.
pub struct ProcessExecutionService {
    process_repo: Arc<dyn ProcessRepository>,
    instance_repo: Arc<dyn InstanceRepository>,
    submission_repo: Arc<dyn SubmissionRepository>,
    forms: Arc<dyn FormsProvider>,
    credentials: Arc<GuestCredentialService>,
}

impl ProcessExecutionService {
    /// Create a new execution service
    pub fn new(
        process_repo: Arc<dyn ProcessRepository>,
        instance_repo: Arc<dyn InstanceRepository>,
        submission_repo: Arc<dyn SubmissionRepository>,
        forms: Arc<dyn FormsProvider>,
        credentials: Arc<GuestCredentialService>,
    ) -> Self {
        Self {
            process_repo,
            instance_repo,
            submission_repo,
            forms,
            credentials,
        }
    }

    /// Start an instance of an active process.
    ///
    /// Guests get a bearer token in the result; an authenticated user may
    /// hold at most one running instance per process.
    pub async fn start_instance(
        &self,
        process_id: &ProcessId,
        started_by: Option<UserId>,
    ) -> Result<StartedInstance, CoreError> {
        let process = self
            .process_repo
            .find_by_id(process_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| {
                CoreError::Validation("process not found or not active".to_string())
            })?;

        if let Some(user) = &started_by {
            if let Some(existing) = self
                .instance_repo
                .find_running_for_user(process_id, user)
                .await?
            {
                return Err(CoreError::Conflict(format!(
                    "a running instance already exists: {}",
                    existing.0
                )));
            }
        }

        let mut instance = ProcessInstance::new(&process, started_by)?;
        let access_token = if instance.is_guest() {
            Some(self.credentials.issue(&mut instance, false).await?)
        } else {
            None
        };

        self.instance_repo.save(&instance).await?;
        self.drain_events(&mut instance);
        info!(
            instance_id = %instance.id.0,
            process_id = %process.id.0,
            guest = instance.is_guest(),
            "Started instance"
        );

        Ok(StartedInstance {
            instance,
            access_token,
        })
    }

    /// Fetch an instance after a credential check
    pub async fn get_instance(
        &self,
        instance_id: &InstanceId,
        token: Option<&str>,
    ) -> Result<ProcessInstance, CoreError> {
        let instance = self.load_instance(instance_id).await?;
        self.credentials.validate(&instance, token).await?;
        Ok(instance)
    }

    /// Sequential view: the step the participant must answer next
    pub async fn current_step(
        &self,
        instance_id: &InstanceId,
        token: Option<&str>,
    ) -> Result<CurrentStepView, CoreError> {
        let instance = self.get_instance(instance_id, token).await?;
        let process = self.load_process(&instance.process_id).await?;
        if !process.is_sequential() {
            return Err(CoreError::Validation(
                "process is not sequential".to_string(),
            ));
        }

        let step = instance
            .current_step
            .as_ref()
            .and_then(|id| process.step(id))
            .cloned();
        let form = match &step {
            Some(step) => Some(self.forms.step_form(&step.form_id).await?),
            None => None,
        };

        Ok(CurrentStepView {
            step,
            form,
            status: instance.status,
        })
    }

    /// Free-flow view: every step with its submitted flag
    pub async fn current_steps(
        &self,
        instance_id: &InstanceId,
        token: Option<&str>,
    ) -> Result<Vec<StepStatusView>, CoreError> {
        let instance = self.get_instance(instance_id, token).await?;
        let process = self.load_process(&instance.process_id).await?;
        if process.is_sequential() {
            return Err(CoreError::Validation(
                "process is not free-flow".to_string(),
            ));
        }

        let submitted = self.submission_repo.submitted_step_ids(&instance.id).await?;
        Ok(process
            .steps
            .iter()
            .map(|step| StepStatusView {
                step: step.clone(),
                is_submitted: submitted.contains(&step.id),
            })
            .collect())
    }

    /// Record a submission (or skip) and run the state machine.
    ///
    /// The whole read-validate-persist-advance path runs under the
    /// instance's row lock; the `(instance, step)` uniqueness invariant in
    /// the submission repository decides the loser of a concurrent
    /// double-submit.
    pub async fn submit_step(
        &self,
        instance_id: &InstanceId,
        request: SubmitRequest,
    ) -> Result<ProcessInstance, CoreError> {
        let _guard = self.instance_repo.lock(instance_id).await?;

        let mut instance = self.load_instance(instance_id).await?;
        self.credentials
            .validate(&instance, request.token.as_deref())
            .await?;

        match instance.status {
            InstanceStatus::Running => {}
            InstanceStatus::Completed => {
                return Err(CoreError::Conflict(
                    "process already completed".to_string(),
                ));
            }
            InstanceStatus::Aborted => {
                return Err(CoreError::Conflict("instance aborted".to_string()));
            }
        }

        let process = self.load_process(&instance.process_id).await?;
        let step = self.resolve_step(&process, &instance, &request.step_id)?;
        let form = self.forms.step_form(&step.form_id).await?;

        if let Some(stored) = &form.password {
            let supplied = request
                .password
                .as_deref()
                .ok_or_else(|| CoreError::Auth("password required".to_string()))?;
            if supplied != stored {
                return Err(CoreError::Auth("wrong password".to_string()));
            }
        }

        let submission = if request.skip {
            if !step.allow_skip {
                return Err(CoreError::Validation(
                    "this step cannot be skipped".to_string(),
                ));
            }
            let submission = StepSubmission::skipped(instance.id.clone(), step.id.clone());
            self.submission_repo.insert(&submission).await?;
            submission
        } else {
            for answer in &request.answers {
                if !form.has_field(&answer.field_id) {
                    return Err(CoreError::Validation(format!(
                        "unknown field: {}",
                        answer.field_id.0
                    )));
                }
            }
            for field in form.fields.iter().filter(|f| f.required) {
                if !request.answers.iter().any(|a| a.field_id == field.id) {
                    return Err(CoreError::Validation(format!(
                        "missing required field: {}",
                        field.label
                    )));
                }
            }

            let response_id = self
                .forms
                .record_response(
                    &form.form_id,
                    instance.started_by.as_ref(),
                    &request.answers,
                )
                .await?;
            let submission =
                StepSubmission::answered(instance.id.clone(), step.id.clone(), response_id);
            if let Err(e) = self.submission_repo.insert(&submission).await {
                // The response must not outlive a failed submission
                if let Some(response_id) = &submission.response_id {
                    if let Err(cleanup) = self.forms.delete_response(response_id).await {
                        warn!(error = %cleanup, "Failed to clean up orphaned response");
                    }
                }
                return Err(e);
            }
            submission
        };

        let step_id = step.id.clone();
        instance.advance_after_submission(&process, &step_id);
        let submitted = self.submission_repo.submitted_step_ids(&instance.id).await?;
        instance.mark_completed_if_done(&process, &submitted);
        instance.record_event(crate::domain::events::DomainEvent::StepSubmitted {
            instance_id: instance.id.clone(),
            step_id: step_id.clone(),
            skipped: submission.skipped,
            timestamp: submission.submitted_at,
        });

        if let Err(e) = self.instance_repo.save(&instance).await {
            // Roll the unit of work back: no submission without the
            // matching instance state
            if let Err(cleanup) = self.submission_repo.remove(&submission.id).await {
                warn!(error = %cleanup, "Failed to roll back submission");
            }
            if let Some(response_id) = &submission.response_id {
                if let Err(cleanup) = self.forms.delete_response(response_id).await {
                    warn!(error = %cleanup, "Failed to roll back response");
                }
            }
            return Err(e);
        }

        self.drain_events(&mut instance);
        info!(
            instance_id = %instance.id.0,
            step_id = %step_id.0,
            skipped = submission.skipped,
            status = ?instance.status,
            "Recorded step submission"
        );
        Ok(instance)
    }

    /// Delete a submission and re-evaluate the instance.
    ///
    /// Compensating path: a completed instance that no longer satisfies
    /// the completion predicate reverts to running.
    pub async fn delete_submission(
        &self,
        caller: &UserId,
        instance_id: &InstanceId,
        submission_id: &SubmissionId,
    ) -> Result<ProcessInstance, CoreError> {
        let _guard = self.instance_repo.lock(instance_id).await?;

        let mut instance = self.load_instance(instance_id).await?;
        let process = self.load_process(&instance.process_id).await?;
        if &process.owner != caller {
            return Err(CoreError::Forbidden(
                "only the process owner may delete submissions".to_string(),
            ));
        }

        let submission = self
            .submission_repo
            .find_by_id(submission_id)
            .await?
            .filter(|s| &s.instance_id == instance_id)
            .ok_or_else(|| CoreError::NotFound("Submission".to_string()))?;

        self.submission_repo.remove(&submission.id).await?;
        if let Some(response_id) = &submission.response_id {
            if let Err(e) = self.forms.delete_response(response_id).await {
                warn!(error = %e, "Failed to delete response for removed submission");
            }
        }

        let submitted = self.submission_repo.submitted_step_ids(&instance.id).await?;
        instance.revert_if_incomplete(&process, &submitted);
        self.instance_repo.save(&instance).await?;
        self.drain_events(&mut instance);
        info!(
            instance_id = %instance.id.0,
            submission_id = %submission.id.0,
            status = ?instance.status,
            "Deleted submission"
        );
        Ok(instance)
    }

    /// Abort a running instance (owner action)
    pub async fn abort_instance(
        &self,
        caller: &UserId,
        instance_id: &InstanceId,
    ) -> Result<ProcessInstance, CoreError> {
        let _guard = self.instance_repo.lock(instance_id).await?;

        let mut instance = self.load_instance(instance_id).await?;
        let process = self.load_process(&instance.process_id).await?;
        if &process.owner != caller {
            return Err(CoreError::Forbidden(
                "only the process owner may abort instances".to_string(),
            ));
        }

        instance.abort()?;
        self.instance_repo.save(&instance).await?;
        self.drain_events(&mut instance);
        info!(instance_id = %instance.id.0, "Aborted instance");
        Ok(instance)
    }

    /// Resolve and authorize the target step for a submission
    fn resolve_step<'a>(
        &self,
        process: &'a Process,
        instance: &ProcessInstance,
        step_id: &StepId,
    ) -> Result<&'a ProcessStep, CoreError> {
        let step = process
            .step(step_id)
            .ok_or_else(|| CoreError::NotFound("Step".to_string()))?;

        if process.is_sequential() {
            match &instance.current_step {
                None => {
                    return Err(CoreError::Conflict(
                        "process already completed".to_string(),
                    ));
                }
                Some(current) if current != step_id => {
                    return Err(CoreError::Conflict("wrong step".to_string()));
                }
                Some(_) => {}
            }
        }
        Ok(step)
    }

    async fn load_instance(&self, id: &InstanceId) -> Result<ProcessInstance, CoreError> {
        self.instance_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Instance".to_string()))
    }

    async fn load_process(&self, id: &ProcessId) -> Result<Process, CoreError> {
        self.process_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound("Process".to_string()))
    }

    fn drain_events(&self, instance: &mut ProcessInstance) {
        for event in instance.take_events() {
            event.log();
        }
    }
}
