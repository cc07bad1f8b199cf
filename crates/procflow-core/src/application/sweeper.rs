//! Expiry sweeper
//!
//! Guests who abandon an instance leave a running row and a live cache
//! entry behind. The sweeper reclaims both: it periodically selects
//! running, guest-owned, token-expired instances and hard-deletes them
//! together with their submissions. Row acquisition is non-blocking so
//! overlapping sweeps skip rows instead of contending for them.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    application::credentials::GuestCredentialService,
    domain::forms::FormsProvider,
    domain::repository::{InstanceRepository, SubmissionRepository},
    CoreError,
};

/// Counters for one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances deleted
    pub reclaimed: usize,

    /// Rows skipped because another task held their lock
    pub skipped: usize,
}

/// Background reclaimer of expired guest instances
pub struct ExpirySweeper {
    instance_repo: Arc<dyn InstanceRepository>,
    submission_repo: Arc<dyn SubmissionRepository>,
    forms: Arc<dyn FormsProvider>,
    credentials: Arc<GuestCredentialService>,
    interval: Duration,
}

impl ExpirySweeper {
    /// Create a sweeper with the given pass interval
    pub fn new(
        instance_repo: Arc<dyn InstanceRepository>,
        submission_repo: Arc<dyn SubmissionRepository>,
        forms: Arc<dyn FormsProvider>,
        credentials: Arc<GuestCredentialService>,
        interval: Duration,
    ) -> Self {
        Self {
            instance_repo,
            submission_repo,
            forms,
            credentials,
            interval,
        }
    }

    /// Run sweep passes forever. Intended to be spawned as a task.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so a fresh server
        // does not sweep before it serves
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report) if report.reclaimed > 0 || report.skipped > 0 => {
                    info!(
                        reclaimed = report.reclaimed,
                        skipped = report.skipped,
                        "Sweep pass finished"
                    );
                }
                Ok(_) => debug!("Sweep pass found nothing to reclaim"),
                Err(e) => warn!(error = %e, "Sweep pass failed"),
            }
        }
    }

    /// One sweep pass over the expired guest instances
    pub async fn sweep_once(&self) -> Result<SweepReport, CoreError> {
        let now = Utc::now();
        let candidates = self.instance_repo.expired_guest_instances(now).await?;

        let mut report = SweepReport::default();
        for instance_id in candidates {
            let guard = match self.instance_repo.try_lock(&instance_id).await? {
                Some(guard) => guard,
                None => {
                    report.skipped += 1;
                    continue;
                }
            };

            // Re-read under the lock: a submission may have landed between
            // selection and acquisition
            let instance = match self.instance_repo.find_by_id(&instance_id).await? {
                Some(instance) if instance.is_guest() && instance.token_expired(now) => instance,
                _ => {
                    drop(guard);
                    continue;
                }
            };

            self.credentials.revoke(&instance).await?;

            let submissions = self.submission_repo.list_for_instance(&instance.id).await?;
            for submission in &submissions {
                if let Some(response_id) = &submission.response_id {
                    if let Err(e) = self.forms.delete_response(response_id).await {
                        warn!(
                            instance_id = %instance.id.0,
                            error = %e,
                            "Failed to delete response during sweep"
                        );
                    }
                }
            }
            self.submission_repo.delete_for_instance(&instance.id).await?;
            self.instance_repo.delete(&instance.id).await?;

            debug!(
                instance_id = %instance.id.0,
                submissions = submissions.len(),
                "Reclaimed expired guest instance"
            );
            report.reclaimed += 1;
            drop(guard);
        }

        Ok(report)
    }
}
