//! Repository traits for the Procflow engine
//!
//! External crates can implement these traits to provide different
//! persistence mechanisms. The instance repository owns a per-row lock:
//! every state transition acquires it before the read-modify-write, which
//! serializes concurrent submissions against the same instance. The
//! non-blocking variant gives the sweeper skip-locked semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::OwnedMutexGuard;

use crate::domain::instance::{InstanceId, ProcessInstance};
use crate::domain::process::{ExecutionMode, Process, ProcessId, StepId, UserId};
use crate::domain::submission::{StepSubmission, SubmissionId};
use crate::CoreError;

/// Filters for process listings
#[derive(Debug, Clone, Default)]
pub struct ProcessFilter {
    /// Only processes with the active flag set
    pub active_only: bool,

    /// Restrict to one execution mode
    pub mode: Option<ExecutionMode>,

    /// Case-insensitive title substring match
    pub search: Option<String>,
}

/// Repository for process definitions
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    /// Find a process by ID
    async fn find_by_id(&self, id: &ProcessId) -> Result<Option<Process>, CoreError>;

    /// Save a process
    async fn save(&self, process: &Process) -> Result<(), CoreError>;

    /// Delete a process
    async fn delete(&self, id: &ProcessId) -> Result<(), CoreError>;

    /// List processes, newest first
    async fn list(&self, filter: &ProcessFilter) -> Result<Vec<Process>, CoreError>;
}

/// Repository for process instances
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Find an instance by ID
    async fn find_by_id(&self, id: &InstanceId) -> Result<Option<ProcessInstance>, CoreError>;

    /// Save an instance. Enforces global uniqueness of access tokens.
    async fn save(&self, instance: &ProcessInstance) -> Result<(), CoreError>;

    /// Delete an instance and its submissions
    async fn delete(&self, id: &InstanceId) -> Result<(), CoreError>;

    /// Whether any instance references the process (mutation guard)
    async fn has_instances(&self, process_id: &ProcessId) -> Result<bool, CoreError>;

    /// A running instance of the process started by the given user, if any
    async fn find_running_for_user(
        &self,
        process_id: &ProcessId,
        user: &UserId,
    ) -> Result<Option<InstanceId>, CoreError>;

    /// Running, guest-owned instances whose token expired before `now`
    async fn expired_guest_instances(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<InstanceId>, CoreError>;

    /// Acquire the row lock for an instance, waiting if necessary
    async fn lock(&self, id: &InstanceId) -> Result<OwnedMutexGuard<()>, CoreError>;

    /// Acquire the row lock without blocking; `None` when already held
    async fn try_lock(&self, id: &InstanceId) -> Result<Option<OwnedMutexGuard<()>>, CoreError>;
}

/// Repository for step submissions
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Insert a submission. The `(instance, step)` uniqueness invariant is
    /// enforced here: a duplicate insert fails with `Conflict`, which is
    /// how exactly one of two concurrent submits wins.
    async fn insert(&self, submission: &StepSubmission) -> Result<(), CoreError>;

    /// Find a submission by ID
    async fn find_by_id(&self, id: &SubmissionId) -> Result<Option<StepSubmission>, CoreError>;

    /// Remove a submission, returning it if it existed
    async fn remove(&self, id: &SubmissionId) -> Result<Option<StepSubmission>, CoreError>;

    /// Distinct step ids with a submission for the instance
    async fn submitted_step_ids(
        &self,
        instance_id: &InstanceId,
    ) -> Result<HashSet<StepId>, CoreError>;

    /// All submissions for an instance, oldest first
    async fn list_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<StepSubmission>, CoreError>;

    /// Cascade-delete all submissions of an instance
    async fn delete_for_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError>;
}

/// In-memory implementations backed by concurrent maps
pub mod memory {
    use super::*;
    use dashmap::mapref::entry::Entry;
    use dashmap::DashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// In-memory implementation of the process repository
    #[derive(Default)]
    pub struct InMemoryProcessRepository {
        processes: DashMap<String, Process>,
    }

    impl InMemoryProcessRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ProcessRepository for InMemoryProcessRepository {
        async fn find_by_id(&self, id: &ProcessId) -> Result<Option<Process>, CoreError> {
            Ok(self.processes.get(&id.0).map(|p| p.clone()))
        }

        async fn save(&self, process: &Process) -> Result<(), CoreError> {
            self.processes.insert(process.id.0.clone(), process.clone());
            Ok(())
        }

        async fn delete(&self, id: &ProcessId) -> Result<(), CoreError> {
            self.processes.remove(&id.0);
            Ok(())
        }

        async fn list(&self, filter: &ProcessFilter) -> Result<Vec<Process>, CoreError> {
            let needle = filter.search.as_ref().map(|s| s.to_lowercase());
            let mut result: Vec<Process> = self
                .processes
                .iter()
                .filter(|p| !filter.active_only || p.active)
                .filter(|p| filter.mode.map_or(true, |m| p.mode == m))
                .filter(|p| {
                    needle
                        .as_ref()
                        .map_or(true, |n| p.title.to_lowercase().contains(n))
                })
                .map(|p| p.clone())
                .collect();
            result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(result)
        }
    }

    /// In-memory implementation of the instance repository
    #[derive(Default)]
    pub struct InMemoryInstanceRepository {
        instances: DashMap<String, ProcessInstance>,
        // access_token -> instance id, kept unique
        token_index: DashMap<String, String>,
        row_locks: DashMap<String, Arc<Mutex<()>>>,
    }

    impl InMemoryInstanceRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }

        fn row_lock(&self, id: &InstanceId) -> Arc<Mutex<()>> {
            self.row_locks
                .entry(id.0.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        }
    }

    #[async_trait]
    impl InstanceRepository for InMemoryInstanceRepository {
        async fn find_by_id(
            &self,
            id: &InstanceId,
        ) -> Result<Option<ProcessInstance>, CoreError> {
            Ok(self.instances.get(&id.0).map(|i| i.clone()))
        }

        async fn save(&self, instance: &ProcessInstance) -> Result<(), CoreError> {
            if let Some(token) = &instance.access_token {
                match self.token_index.entry(token.clone()) {
                    Entry::Occupied(existing) if existing.get() != &instance.id.0 => {
                        return Err(CoreError::StateStore(
                            "access token already in use".to_string(),
                        ));
                    }
                    Entry::Occupied(_) => {}
                    Entry::Vacant(slot) => {
                        slot.insert(instance.id.0.clone());
                    }
                }
            }
            self.instances.insert(instance.id.0.clone(), instance.clone());
            Ok(())
        }

        async fn delete(&self, id: &InstanceId) -> Result<(), CoreError> {
            if let Some((_, instance)) = self.instances.remove(&id.0) {
                if let Some(token) = instance.access_token {
                    self.token_index.remove(&token);
                }
            }
            self.row_locks.remove(&id.0);
            Ok(())
        }

        async fn has_instances(&self, process_id: &ProcessId) -> Result<bool, CoreError> {
            Ok(self
                .instances
                .iter()
                .any(|i| i.process_id == *process_id))
        }

        async fn find_running_for_user(
            &self,
            process_id: &ProcessId,
            user: &UserId,
        ) -> Result<Option<InstanceId>, CoreError> {
            Ok(self
                .instances
                .iter()
                .find(|i| {
                    i.process_id == *process_id
                        && i.started_by.as_ref() == Some(user)
                        && i.status == crate::domain::instance::InstanceStatus::Running
                })
                .map(|i| i.id.clone()))
        }

        async fn expired_guest_instances(
            &self,
            now: DateTime<Utc>,
        ) -> Result<Vec<InstanceId>, CoreError> {
            Ok(self
                .instances
                .iter()
                .filter(|i| {
                    i.is_guest()
                        && i.status == crate::domain::instance::InstanceStatus::Running
                        && i.token_expired(now)
                })
                .map(|i| i.id.clone())
                .collect())
        }

        async fn lock(&self, id: &InstanceId) -> Result<OwnedMutexGuard<()>, CoreError> {
            Ok(self.row_lock(id).lock_owned().await)
        }

        async fn try_lock(
            &self,
            id: &InstanceId,
        ) -> Result<Option<OwnedMutexGuard<()>>, CoreError> {
            Ok(self.row_lock(id).try_lock_owned().ok())
        }
    }

    /// In-memory implementation of the submission repository
    #[derive(Default)]
    pub struct InMemorySubmissionRepository {
        submissions: DashMap<String, StepSubmission>,
        // (instance id, step id) -> submission id; the uniqueness invariant
        by_instance_step: DashMap<(String, String), String>,
    }

    impl InMemorySubmissionRepository {
        /// Create an empty repository
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl SubmissionRepository for InMemorySubmissionRepository {
        async fn insert(&self, submission: &StepSubmission) -> Result<(), CoreError> {
            let key = (
                submission.instance_id.0.clone(),
                submission.step_id.0.clone(),
            );
            match self.by_instance_step.entry(key) {
                Entry::Occupied(_) => {
                    return Err(CoreError::Conflict("step already submitted".to_string()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(submission.id.0.clone());
                }
            }
            self.submissions
                .insert(submission.id.0.clone(), submission.clone());
            Ok(())
        }

        async fn find_by_id(
            &self,
            id: &SubmissionId,
        ) -> Result<Option<StepSubmission>, CoreError> {
            Ok(self.submissions.get(&id.0).map(|s| s.clone()))
        }

        async fn remove(&self, id: &SubmissionId) -> Result<Option<StepSubmission>, CoreError> {
            match self.submissions.remove(&id.0) {
                Some((_, submission)) => {
                    self.by_instance_step.remove(&(
                        submission.instance_id.0.clone(),
                        submission.step_id.0.clone(),
                    ));
                    Ok(Some(submission))
                }
                None => Ok(None),
            }
        }

        async fn submitted_step_ids(
            &self,
            instance_id: &InstanceId,
        ) -> Result<HashSet<StepId>, CoreError> {
            Ok(self
                .submissions
                .iter()
                .filter(|s| s.instance_id == *instance_id)
                .map(|s| s.step_id.clone())
                .collect())
        }

        async fn list_for_instance(
            &self,
            instance_id: &InstanceId,
        ) -> Result<Vec<StepSubmission>, CoreError> {
            let mut result: Vec<StepSubmission> = self
                .submissions
                .iter()
                .filter(|s| s.instance_id == *instance_id)
                .map(|s| s.clone())
                .collect();
            result.sort_by_key(|s| s.submitted_at);
            Ok(result)
        }

        async fn delete_for_instance(&self, instance_id: &InstanceId) -> Result<(), CoreError> {
            let ids: Vec<String> = self
                .submissions
                .iter()
                .filter(|s| s.instance_id == *instance_id)
                .map(|s| s.id.0.clone())
                .collect();
            for id in ids {
                if let Some((_, submission)) = self.submissions.remove(&id) {
                    self.by_instance_step.remove(&(
                        submission.instance_id.0.clone(),
                        submission.step_id.0.clone(),
                    ));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::*;
    use super::*;
    use crate::domain::forms::FormId;
    use crate::domain::instance::ProcessInstance;
    use crate::domain::process::ExecutionMode;

    fn make_process() -> Process {
        let mut process = Process::new(
            UserId("owner".to_string()),
            "repo test".to_string(),
            ExecutionMode::Sequential,
        );
        process
            .add_step(FormId::new(), String::new(), Some(1), false)
            .unwrap();
        process
    }

    #[tokio::test]
    async fn test_duplicate_submission_insert_conflicts() {
        let repo = InMemorySubmissionRepository::new();
        let process = make_process();
        let instance = ProcessInstance::new(&process, None).unwrap();
        let step = process.steps[0].id.clone();

        let first = StepSubmission::skipped(instance.id.clone(), step.clone());
        repo.insert(&first).await.unwrap();

        let second = StepSubmission::skipped(instance.id.clone(), step.clone());
        let err = repo.insert(&second).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let ids = repo.submitted_step_ids(&instance.id).await.unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_frees_the_unique_slot() {
        let repo = InMemorySubmissionRepository::new();
        let process = make_process();
        let instance = ProcessInstance::new(&process, None).unwrap();
        let step = process.steps[0].id.clone();

        let submission = StepSubmission::skipped(instance.id.clone(), step.clone());
        repo.insert(&submission).await.unwrap();
        repo.remove(&submission.id).await.unwrap().unwrap();

        // Slot is free again
        let again = StepSubmission::skipped(instance.id.clone(), step);
        repo.insert(&again).await.unwrap();
    }

    #[tokio::test]
    async fn test_try_lock_skips_held_rows() {
        let repo = InMemoryInstanceRepository::new();
        let process = make_process();
        let instance = ProcessInstance::new(&process, None).unwrap();
        repo.save(&instance).await.unwrap();

        let guard = repo.lock(&instance.id).await.unwrap();
        assert!(repo.try_lock(&instance.id).await.unwrap().is_none());
        drop(guard);
        assert!(repo.try_lock(&instance.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_token_uniqueness_on_save() {
        let repo = InMemoryInstanceRepository::new();
        let process = make_process();

        let mut a = ProcessInstance::new(&process, None).unwrap();
        a.set_guest_credentials("tok".to_string(), chrono::Duration::hours(1));
        repo.save(&a).await.unwrap();
        // Re-saving the same instance is fine
        repo.save(&a).await.unwrap();

        let mut b = ProcessInstance::new(&process, None).unwrap();
        b.set_guest_credentials("tok".to_string(), chrono::Duration::hours(1));
        assert!(matches!(
            repo.save(&b).await,
            Err(CoreError::StateStore(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_guest_selection() {
        let repo = InMemoryInstanceRepository::new();
        let process = make_process();

        let mut expired = ProcessInstance::new(&process, None).unwrap();
        expired.set_guest_credentials("t1".to_string(), chrono::Duration::hours(-1));
        repo.save(&expired).await.unwrap();

        let mut live = ProcessInstance::new(&process, None).unwrap();
        live.set_guest_credentials("t2".to_string(), chrono::Duration::hours(1));
        repo.save(&live).await.unwrap();

        let authenticated =
            ProcessInstance::new(&process, Some(UserId("alice".to_string()))).unwrap();
        repo.save(&authenticated).await.unwrap();

        let hits = repo.expired_guest_instances(Utc::now()).await.unwrap();
        assert_eq!(hits, vec![expired.id]);
    }

    #[tokio::test]
    async fn test_process_listing_filters_and_order() {
        let repo = InMemoryProcessRepository::new();
        let owner = UserId("owner".to_string());

        let mut older = Process::new(owner.clone(), "Alpha intake".to_string(), ExecutionMode::Sequential);
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        repo.save(&older).await.unwrap();

        let mut inactive = Process::new(owner.clone(), "Beta".to_string(), ExecutionMode::Sequential);
        inactive.active = false;
        repo.save(&inactive).await.unwrap();

        let newer = Process::new(owner, "alpha survey".to_string(), ExecutionMode::FreeFlow);
        repo.save(&newer).await.unwrap();

        let all_active = repo
            .list(&ProcessFilter {
                active_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(all_active.len(), 2);
        assert_eq!(all_active[0].id, newer.id, "newest first");

        let sequential = repo
            .list(&ProcessFilter {
                active_only: true,
                mode: Some(ExecutionMode::Sequential),
                search: Some("ALPHA".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(sequential.len(), 1);
        assert_eq!(sequential[0].id, older.id);
    }
}
