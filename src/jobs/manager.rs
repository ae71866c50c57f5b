//! Job lifecycle management on a worker.
//!
//! The manager owns every status change a request can cause. Submission
//! writes the PENDING row before touching the backend, so a crash between the
//! two leaves a visible row rather than an untracked backend job. Cancel and
//! delete confirm with the backend before mutating the store, so the two never
//! disagree about whether a job is still active.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendError, BackendJobSpec, BackendResult, ExecutionBackend};
use crate::error::{RelayError, Result};
use crate::jobs::poller::PollerRegistry;
use crate::jobs::{Job, JobKey, JobStatus, JobTransition};
use crate::resources::{ResourceOverride, ResourceProfiles};
use crate::store::{JobStore, StoreError};

/// Reason recorded on transitions caused by CancelJob.
pub const CANCELLED_BY_REQUEST: &str = "cancelled by request";

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

/// Cancel re-reads and retries when a concurrent submission moves the job
/// between two live states under it.
const CANCEL_ATTEMPTS: usize = 3;

/// A validated-on-submit job request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitJob {
    pub tenant_id: String,
    pub image_uri: String,
    pub env_vars: Vec<String>,
    pub resource_profile: Option<String>,
    pub resource_override: Option<ResourceOverride>,
}

impl SubmitJob {
    pub fn new(tenant_id: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            image_uri: image_uri.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, var: impl Into<String>) -> Self {
        self.env_vars.push(var.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.resource_profile = Some(profile.into());
        self
    }

    pub fn with_override(mut self, resource_override: ResourceOverride) -> Self {
        self.resource_override = Some(resource_override);
        self
    }
}

fn require(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RelayError::MissingField(field));
    }
    Ok(())
}

fn validate_env_vars(env_vars: &[String]) -> Result<()> {
    for var in env_vars {
        match var.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => {}
            _ => {
                return Err(RelayError::InvalidArgument(format!(
                    "env var {:?} must have the form KEY=VALUE",
                    var
                )))
            }
        }
    }
    Ok(())
}

fn validate_override(resource_override: Option<&ResourceOverride>) -> Result<()> {
    let Some(o) = resource_override else {
        return Ok(());
    };
    let fields = [
        ("cpu_millis", o.cpu_millis),
        ("memory_mib", o.memory_mib),
        ("max_run_duration_seconds", o.max_run_duration_seconds),
    ];
    for (name, value) in fields {
        if let Some(v) = value.filter(|v| *v < 0) {
            return Err(RelayError::InvalidArgument(format!(
                "resource_override.{} must not be negative, got {}",
                name, v
            )));
        }
    }
    Ok(())
}

pub struct JobManager {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    profiles: Arc<ResourceProfiles>,
    pollers: PollerRegistry,
    backend_timeout: Duration,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        profiles: Arc<ResourceProfiles>,
        pollers: PollerRegistry,
    ) -> Self {
        Self {
            store,
            backend,
            profiles,
            pollers,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn pollers(&self) -> &PollerRegistry {
        &self.pollers
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Submit a job to the backend and start tracking it.
    ///
    /// Returns the job as it stands once the backend has answered. A backend
    /// rejection marks the job FAILED and is returned as an error; it is not
    /// retried, since every call mints a new job id.
    pub async fn submit(&self, request: SubmitJob) -> Result<Job> {
        require(&request.tenant_id, "tenant_id")?;
        require(&request.image_uri, "image_uri")?;
        validate_env_vars(&request.env_vars)?;
        validate_override(request.resource_override.as_ref())?;

        let resources = self.profiles.resolve(
            request.resource_profile.as_deref(),
            request.resource_override.as_ref(),
        );
        let mut job = Job::new(
            request.tenant_id,
            request.image_uri,
            request.env_vars,
            resources,
        );
        let key = job.key();

        self.store.insert_job(&job).await?;
        self.record(&key, None, JobStatus::Pending, None).await;
        tracing::info!(
            job_id = %job.job_id,
            tenant_id = %job.tenant_id,
            provider_job_id = %job.provider_job_id,
            "Job saved with PENDING status"
        );

        let spec = BackendJobSpec {
            provider_job_id: job.provider_job_id.clone(),
            image_uri: job.image_uri.clone(),
            env_vars: job.env_vars.clone(),
            resources: job.resources,
        };
        let outcome = match self.backend.submit(&spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "Backend submission failed");
                self.mark_submission_failed(&key, e.to_string()).await;
                return Err(RelayError::SubmissionFailed(e));
            }
        };

        // Accepted by the backend without a recognisable status counts as running.
        let status = outcome.initial_status.unwrap_or(JobStatus::Running);
        let backend_ref = outcome.backend_ref;
        match self
            .store
            .update_status_and_backend_ref(
                &key.tenant_id,
                &key.job_id,
                JobStatus::Pending,
                status,
                &backend_ref,
            )
            .await
        {
            Ok(()) => {}
            Err(StoreError::StatusConflict { actual, .. }) => {
                // Cancelled while the backend call was in flight.
                tracing::warn!(
                    job_id = %job.job_id,
                    backend_ref = %backend_ref,
                    status = %actual,
                    "Job left PENDING during submission, cancelling backend job"
                );
                self.discard_backend_job("cancel", &backend_ref, self.backend.cancel(&backend_ref))
                    .await;
                return self.get(&key.tenant_id, &key.job_id).await;
            }
            Err(StoreError::NotFound { .. }) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    backend_ref = %backend_ref,
                    "Job deleted during submission, deleting backend job"
                );
                self.discard_backend_job("delete", &backend_ref, self.backend.delete(&backend_ref))
                    .await;
                return Err(RelayError::JobNotFound(key.job_id));
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.job_id,
                    backend_ref = %backend_ref,
                    error = %e,
                    "Failed to record backend reference, backend job is untracked"
                );
                self.discard_backend_job("cancel", &backend_ref, self.backend.cancel(&backend_ref))
                    .await;
                self.mark_submission_failed(&key, format!("failed to record backend reference: {}", e))
                    .await;
                return Err(e.into());
            }
        }
        self.record(&key, Some(JobStatus::Pending), status, None).await;

        job.status = status;
        job.backend_ref = Some(backend_ref.clone());
        tracing::info!(
            job_id = %job.job_id,
            status = %status,
            backend_ref = %backend_ref,
            "Job submitted to backend"
        );

        if !status.is_terminal() {
            self.pollers.start(key, backend_ref, status).await;
        }

        Ok(job)
    }

    pub async fn list(&self, tenant_id: &str) -> Result<Vec<Job>> {
        require(tenant_id, "tenant_id")?;
        Ok(self.store.list_jobs(tenant_id).await?)
    }

    pub async fn get(&self, tenant_id: &str, job_id: &str) -> Result<Job> {
        require(tenant_id, "tenant_id")?;
        require(job_id, "job_id")?;
        Ok(self.store.get_job(tenant_id, job_id).await?)
    }

    /// Transition history of a job, oldest first.
    pub async fn history(&self, tenant_id: &str, job_id: &str) -> Result<Vec<JobTransition>> {
        self.get(tenant_id, job_id).await?;
        Ok(self.store.list_transitions(tenant_id, job_id).await?)
    }

    /// Cancel a live job.
    ///
    /// The poller is stopped before anything else so it cannot write a status
    /// concurrently; if the backend refuses, polling resumes and the job keeps
    /// its status. The final write only succeeds if the job still has the
    /// status this call read, so of two racing cancels exactly one wins.
    pub async fn cancel(&self, tenant_id: &str, job_id: &str) -> Result<Job> {
        for _ in 0..CANCEL_ATTEMPTS {
            match self.try_cancel(tenant_id, job_id).await {
                Err(RelayError::Store(StoreError::StatusConflict { actual, .. })) => {
                    tracing::debug!(job_id = %job_id, status = %actual, "Job status moved during cancel, retrying");
                }
                other => return other,
            }
        }

        self.resume_polling(&JobKey::new(tenant_id, job_id)).await;
        Err(RelayError::Internal(format!(
            "job {} kept changing status during cancel",
            job_id
        )))
    }

    async fn try_cancel(&self, tenant_id: &str, job_id: &str) -> Result<Job> {
        let job = self.get(tenant_id, job_id).await?;
        if !job.status.is_cancellable() {
            return Err(RelayError::NotCancellable(job.status));
        }

        let key = job.key();
        self.pollers.stop(&key).await;

        // The poller may have recorded a terminal status before it stopped.
        let mut job = self.get(tenant_id, job_id).await?;
        if !job.status.is_cancellable() {
            return Err(RelayError::NotCancellable(job.status));
        }

        if let Some(backend_ref) = job.backend_ref.clone() {
            if let Err(e) = self
                .await_backend("cancel", self.backend.cancel(&backend_ref))
                .await
            {
                tracing::error!(job_id = %job_id, error = %e, "Backend cancel failed");
                self.resume_polling(&key).await;
                return Err(e);
            }
            tracing::info!(job_id = %job_id, "Job cancelled in backend");
        }

        match self
            .store
            .update_status(tenant_id, job_id, job.status, JobStatus::Cancelled)
            .await
        {
            Ok(()) => {}
            Err(StoreError::StatusConflict { actual, .. }) if actual.is_terminal() => {
                tracing::info!(job_id = %job_id, status = %actual, "Job reached a terminal status during cancel");
                return Err(RelayError::NotCancellable(actual));
            }
            Err(e @ StoreError::StatusConflict { .. }) => return Err(RelayError::Store(e)),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to persist CANCELLED status");
                self.resume_polling(&key).await;
                return Err(e.into());
            }
        }
        self.record(
            &key,
            Some(job.status),
            JobStatus::Cancelled,
            Some(CANCELLED_BY_REQUEST.to_string()),
        )
        .await;

        job.status = JobStatus::Cancelled;
        tracing::info!(job_id = %job_id, tenant_id = %tenant_id, "Job cancelled");
        Ok(job)
    }

    /// Hard-delete a job in any status, backend first.
    pub async fn delete(&self, tenant_id: &str, job_id: &str) -> Result<()> {
        let job = self.get(tenant_id, job_id).await?;

        if let Some(backend_ref) = &job.backend_ref {
            match self
                .await_backend("delete", self.backend.delete(backend_ref))
                .await
            {
                Ok(()) => tracing::info!(job_id = %job_id, "Job deleted from backend"),
                Err(RelayError::Backend(BackendError::NotFound(_))) => {
                    tracing::info!(job_id = %job_id, "Job already absent from backend");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Backend delete failed");
                    return Err(e);
                }
            }
        }

        self.pollers.stop(&job.key()).await;
        self.store.delete_job(tenant_id, job_id).await?;
        tracing::info!(job_id = %job_id, tenant_id = %tenant_id, "Job deleted");
        Ok(())
    }

    async fn await_backend<F>(&self, operation: &'static str, call: F) -> Result<()>
    where
        F: Future<Output = BackendResult<()>>,
    {
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RelayError::BackendTimeout {
                operation,
                timeout_ms: self.backend_timeout.as_millis(),
            }),
        }
    }

    /// Restart polling from the stored row, unless it is gone or terminal.
    async fn resume_polling(&self, key: &JobKey) {
        match self.store.get_job(&key.tenant_id, &key.job_id).await {
            Ok(job) => {
                if let Some(backend_ref) = job.backend_ref.clone() {
                    self.pollers.start(job.key(), backend_ref, job.status).await;
                }
            }
            Err(e) => tracing::warn!(job = %key, error = %e, "Cannot resume polling"),
        }
    }

    /// Best-effort cleanup of a backend job the store no longer tracks.
    async fn discard_backend_job<F>(&self, operation: &'static str, backend_ref: &str, call: F)
    where
        F: Future<Output = BackendResult<()>>,
    {
        if let Err(e) = self.await_backend(operation, call).await {
            tracing::error!(backend_ref = %backend_ref, operation, error = %e, "Failed to clean up backend job");
        }
    }

    async fn mark_submission_failed(&self, key: &JobKey, reason: String) {
        if let Err(e) = self
            .store
            .update_status(&key.tenant_id, &key.job_id, JobStatus::Pending, JobStatus::Failed)
            .await
        {
            tracing::error!(job = %key, error = %e, "Failed to mark job FAILED");
            return;
        }
        self.record(key, Some(JobStatus::Pending), JobStatus::Failed, Some(reason))
            .await;
    }

    /// Append a transition. History is an audit trail, so a failure here is
    /// logged and never undoes the status change.
    async fn record(
        &self,
        key: &JobKey,
        from: Option<JobStatus>,
        to: JobStatus,
        reason: Option<String>,
    ) {
        let transition = JobTransition::new(key, from, to, reason);
        if let Err(e) = self.store.record_transition(&transition).await {
            tracing::warn!(job = %key, error = %e, "Failed to record state transition");
        }
    }
}
