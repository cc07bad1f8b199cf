use crate::{
    domain::events::DomainEvent,
    domain::process::{Process, StepId, UserId},
    CoreError,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Value object: Process Instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Generate a fresh instance ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The participant is still working through the steps
    Running,

    /// Every step was submitted; terminal except for the reversal rule
    Completed,

    /// Reclaimed or cancelled; terminal
    Aborted,
}

/// Aggregate: one participant's run through a process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    /// Unique identifier
    pub id: InstanceId,

    /// The process this instance runs
    pub process_id: crate::domain::process::ProcessId,

    /// Starting participant; absent for guests
    pub started_by: Option<UserId>,

    /// Current status
    pub status: InstanceStatus,

    /// Sequential-mode step pointer; null in free-flow mode or when finished
    pub current_step: Option<StepId>,

    /// Creation timestamp
    pub started_at: DateTime<Utc>,

    /// Set exactly once, on completion
    pub completed_at: Option<DateTime<Utc>>,

    /// Guest bearer token; present iff guest-started. Never serialized as
    /// part of the instance payload, it travels in the start response only.
    #[serde(skip_serializing, default)]
    pub access_token: Option<String>,

    /// Guest token expiry; drives both validation and the sweeper
    #[serde(skip_serializing, default)]
    pub access_token_expires_at: Option<DateTime<Utc>>,

    /// Domain events recorded since the last drain
    #[serde(skip)]
    pub events: Vec<DomainEvent>,
}

impl ProcessInstance {
    /// Create a running instance of the given process.
    ///
    /// Sequential mode sets the current-step pointer to the lowest-order
    /// step and rejects a steps-less process; free-flow leaves the pointer
    /// null and relies on the submitted-step set.
    pub fn new(process: &Process, started_by: Option<UserId>) -> Result<Self, CoreError> {
        let current_step = if process.is_sequential() {
            let first = process
                .first_step()
                .ok_or_else(|| CoreError::Conflict("no steps defined".to_string()))?;
            Some(first.id.clone())
        } else {
            None
        };

        let now = Utc::now();
        let mut instance = Self {
            id: InstanceId::new(),
            process_id: process.id.clone(),
            started_by,
            status: InstanceStatus::Running,
            current_step,
            started_at: now,
            completed_at: None,
            access_token: None,
            access_token_expires_at: None,
            events: Vec::new(),
        };

        instance.record_event(DomainEvent::InstanceStarted {
            instance_id: instance.id.clone(),
            process_id: process.id.clone(),
            guest: instance.is_guest(),
            timestamp: now,
        });

        Ok(instance)
    }

    /// Whether this instance was started anonymously
    #[inline]
    pub fn is_guest(&self) -> bool {
        self.started_by.is_none()
    }

    /// Whether this instance reached the completed state
    #[inline]
    pub fn is_done(&self) -> bool {
        self.status == InstanceStatus::Completed
    }

    /// Whether the guest token has passed its expiry
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        match self.access_token_expires_at {
            Some(expiry) => now >= expiry,
            None => false,
        }
    }

    /// Attach guest credentials with the given lifetime
    pub fn set_guest_credentials(&mut self, token: String, ttl: Duration) {
        self.access_token = Some(token);
        self.access_token_expires_at = Some(Utc::now() + ttl);
    }

    /// Sequential-mode advance, invoked after a successful submission of
    /// the current step. Safe no-op for free-flow instances and for steps
    /// that are not the current step.
    pub fn advance_after_submission(&mut self, process: &Process, step_id: &StepId) {
        if !process.is_sequential() {
            return;
        }
        if self.current_step.as_ref() != Some(step_id) {
            return;
        }

        let submitted_order = process.step(step_id).map(|s| s.order);
        self.current_step = submitted_order
            .and_then(|order| process.next_step_after(order))
            .map(|next| next.id.clone());
    }

    /// Evaluate the completion predicate and mark the instance completed
    /// if it holds. Idempotent: an already-completed instance keeps its
    /// original `completed_at`.
    pub fn mark_completed_if_done(&mut self, process: &Process, submitted: &HashSet<StepId>) {
        if self.status != InstanceStatus::Running {
            return;
        }

        let done = if process.is_sequential() {
            self.current_step.is_none()
        } else {
            process.all_steps_submitted(submitted)
        };

        if done {
            let now = Utc::now();
            self.status = InstanceStatus::Completed;
            self.completed_at = Some(now);
            self.record_event(DomainEvent::InstanceCompleted {
                instance_id: self.id.clone(),
                timestamp: now,
            });
        }
    }

    /// Compensating transition tied to submission deletion: a completed
    /// instance that no longer satisfies the completion predicate reverts
    /// to running and clears `completed_at`. In sequential mode the
    /// current-step pointer is restored to the lowest-order unsubmitted
    /// step so the instance can progress again.
    pub fn revert_if_incomplete(&mut self, process: &Process, submitted: &HashSet<StepId>) {
        if self.status != InstanceStatus::Completed {
            return;
        }
        if process.all_steps_submitted(submitted) {
            return;
        }

        self.status = InstanceStatus::Running;
        self.completed_at = None;
        if process.is_sequential() {
            self.current_step = process
                .steps
                .iter()
                .filter(|s| !submitted.contains(&s.id))
                .min_by_key(|s| s.order)
                .map(|s| s.id.clone());
        }
        self.record_event(DomainEvent::InstanceReverted {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        });
    }

    /// Abort a running instance. Terminal states accept no transitions.
    pub fn abort(&mut self) -> Result<(), CoreError> {
        if self.status != InstanceStatus::Running {
            return Err(CoreError::Conflict(format!(
                "cannot abort instance in state {:?}",
                self.status
            )));
        }
        self.status = InstanceStatus::Aborted;
        self.record_event(DomainEvent::InstanceAborted {
            instance_id: self.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    /// Get and clear all recorded events
    pub fn take_events(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::forms::FormId;
    use crate::domain::process::ExecutionMode;

    fn sequential_process(step_count: usize) -> Process {
        let mut process = Process::new(
            UserId("owner".to_string()),
            "test".to_string(),
            ExecutionMode::Sequential,
        );
        for order in 1..=step_count {
            process
                .add_step(FormId::new(), String::new(), Some(order as u32), false)
                .unwrap();
        }
        process
    }

    fn free_flow_process(step_count: usize) -> Process {
        let mut process = Process::new(
            UserId("owner".to_string()),
            "test".to_string(),
            ExecutionMode::FreeFlow,
        );
        for order in 1..=step_count {
            process
                .add_step(FormId::new(), String::new(), Some(order as u32), false)
                .unwrap();
        }
        process
    }

    #[test]
    fn test_sequential_start_points_at_first_step() {
        let process = sequential_process(2);
        let instance = ProcessInstance::new(&process, None).unwrap();

        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.current_step, Some(process.steps[0].id.clone()));
        assert!(instance.is_guest());
        assert!(!instance.events.is_empty());
    }

    #[test]
    fn test_empty_sequential_process_rejected_at_start() {
        let process = sequential_process(0);
        let result = ProcessInstance::new(&process, None);
        match result {
            Err(CoreError::Conflict(msg)) => assert!(msg.contains("no steps defined")),
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_free_flow_start_leaves_pointer_null() {
        let process = free_flow_process(2);
        let instance =
            ProcessInstance::new(&process, Some(UserId("alice".to_string()))).unwrap();
        assert!(instance.current_step.is_none());
        assert!(!instance.is_guest());
    }

    #[test]
    fn test_advance_is_monotonic_and_completes() {
        let process = sequential_process(2);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        let step1 = process.steps[0].id.clone();
        let step2 = process.steps[1].id.clone();

        instance.advance_after_submission(&process, &step1);
        assert_eq!(instance.current_step, Some(step2.clone()));

        instance.advance_after_submission(&process, &step2);
        assert!(instance.current_step.is_none());

        instance.mark_completed_if_done(&process, &HashSet::new());
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.completed_at.is_some());
    }

    #[test]
    fn test_advance_on_non_current_step_is_noop() {
        let process = sequential_process(2);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        let step2 = process.steps[1].id.clone();

        instance.advance_after_submission(&process, &step2);
        assert_eq!(instance.current_step, Some(process.steps[0].id.clone()));
    }

    #[test]
    fn test_completion_is_idempotent() {
        let process = free_flow_process(1);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        let submitted: HashSet<StepId> = process.step_ids();

        instance.mark_completed_if_done(&process, &submitted);
        let first_completed_at = instance.completed_at;
        assert!(first_completed_at.is_some());

        instance.mark_completed_if_done(&process, &submitted);
        assert_eq!(instance.completed_at, first_completed_at);
    }

    #[test]
    fn test_free_flow_completion_requires_superset() {
        let process = free_flow_process(2);
        let mut instance = ProcessInstance::new(&process, None).unwrap();

        let mut submitted = HashSet::new();
        submitted.insert(process.steps[1].id.clone());
        instance.mark_completed_if_done(&process, &submitted);
        assert_eq!(instance.status, InstanceStatus::Running);

        submitted.insert(process.steps[0].id.clone());
        instance.mark_completed_if_done(&process, &submitted);
        assert_eq!(instance.status, InstanceStatus::Completed);
    }

    #[test]
    fn test_reversal_on_submission_deletion() {
        let process = free_flow_process(2);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        let submitted: HashSet<StepId> = process.step_ids();
        instance.mark_completed_if_done(&process, &submitted);
        assert!(instance.is_done());

        // One submission gone, the predicate no longer holds
        let mut remaining = submitted.clone();
        remaining.remove(&process.steps[0].id);
        instance.revert_if_incomplete(&process, &remaining);

        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.completed_at.is_none());
    }

    #[test]
    fn test_sequential_reversal_restores_pointer() {
        let process = sequential_process(2);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        let step1 = process.steps[0].id.clone();
        let step2 = process.steps[1].id.clone();

        instance.advance_after_submission(&process, &step1);
        instance.advance_after_submission(&process, &step2);
        let submitted: HashSet<StepId> = process.step_ids();
        instance.mark_completed_if_done(&process, &submitted);
        assert!(instance.is_done());

        let mut remaining = submitted;
        remaining.remove(&step2);
        instance.revert_if_incomplete(&process, &remaining);
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.current_step, Some(step2));
    }

    #[test]
    fn test_reversal_noop_when_predicate_still_holds() {
        let process = free_flow_process(1);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        let submitted: HashSet<StepId> = process.step_ids();
        instance.mark_completed_if_done(&process, &submitted);
        let completed_at = instance.completed_at;

        instance.revert_if_incomplete(&process, &submitted);
        assert!(instance.is_done());
        assert_eq!(instance.completed_at, completed_at);
    }

    #[test]
    fn test_abort_transitions() {
        let process = sequential_process(1);
        let mut instance = ProcessInstance::new(&process, None).unwrap();

        instance.abort().unwrap();
        assert_eq!(instance.status, InstanceStatus::Aborted);
        assert!(instance.completed_at.is_none());

        // Terminal: aborting again fails
        assert!(matches!(instance.abort(), Err(CoreError::Conflict(_))));
    }

    #[test]
    fn test_token_expiry_check() {
        let process = sequential_process(1);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        assert!(!instance.token_expired(Utc::now()));

        instance.set_guest_credentials("tok".to_string(), Duration::hours(24));
        assert!(!instance.token_expired(Utc::now()));
        assert!(instance.token_expired(Utc::now() + Duration::hours(25)));
    }

    #[test]
    fn test_token_never_serialized() {
        let process = sequential_process(1);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        instance.set_guest_credentials("secret-token".to_string(), Duration::hours(24));

        let json = serde_json::to_value(&instance).unwrap();
        assert!(json.get("access_token").is_none());
        assert!(json.get("access_token_expires_at").is_none());
        assert_eq!(json["status"], serde_json::json!("running"));
    }

    #[test]
    fn test_take_events_drains() {
        let process = sequential_process(1);
        let mut instance = ProcessInstance::new(&process, None).unwrap();
        assert!(!instance.take_events().is_empty());
        assert!(instance.take_events().is_empty());
    }
}
