use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{BackendError, BackendJobSpec, BackendResult, ExecutionBackend, SubmitOutcome};
use crate::jobs::JobStatus;

/// Behaviour of the simulated backend.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Status reported on submission. `None` reports an unknown state.
    pub initial_status: Option<JobStatus>,
    /// Status polls answered with `Running` before a job reports
    /// `Succeeded`. Zero keeps jobs running until told otherwise.
    pub polls_until_done: u32,
    /// Latency before cancel and delete are acknowledged.
    pub ack_delay: Duration,
    /// Latency before a submission is accepted.
    pub submit_delay: Duration,
    /// Latency of every status query.
    pub status_delay: Duration,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            initial_status: None,
            polls_until_done: 3,
            ack_delay: Duration::from_millis(10),
            submit_delay: Duration::ZERO,
            status_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct SimulatedJob {
    spec: BackendJobSpec,
    status: JobStatus,
    polls: u32,
    pinned: bool,
}

/// In-process stand-in for a cloud batch API.
///
/// Jobs progress on their own as they are polled. Tests can pin a job to a
/// status and inject failures into any of the four calls.
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    config: SimulatedConfig,
    jobs: Mutex<HashMap<String, SimulatedJob>>,
    submit_failure: Mutex<Option<String>>,
    cancel_failing: AtomicBool,
    delete_failing: AtomicBool,
    status_failing: AtomicBool,
    status_failures_remaining: AtomicU32,
    submits: AtomicUsize,
    status_polls: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Backend reference the simulator hands out for a provider job id.
    pub fn backend_ref_for(provider_job_id: &str) -> String {
        format!("projects/local/locations/sim/jobs/{}", provider_job_id)
    }

    /// Make subsequent submissions fail with the given message.
    pub async fn fail_submissions(&self, message: impl Into<String>) {
        *self.submit_failure.lock().await = Some(message.into());
    }

    pub async fn accept_submissions(&self) {
        *self.submit_failure.lock().await = None;
    }

    pub fn set_cancel_failing(&self, failing: bool) {
        self.cancel_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delete_failing(&self, failing: bool) {
        self.delete_failing.store(failing, Ordering::SeqCst);
    }

    /// Fail every status query until switched off.
    pub fn set_status_failing(&self, failing: bool) {
        self.status_failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` status queries.
    pub fn fail_next_status_queries(&self, count: u32) {
        self.status_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    /// Pin a job to a status; it no longer progresses on its own.
    pub async fn set_status(&self, backend_ref: &str, status: JobStatus) -> BackendResult<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(backend_ref)
            .ok_or_else(|| BackendError::NotFound(backend_ref.to_string()))?;
        job.status = status;
        job.pinned = true;
        Ok(())
    }

    /// Register a job as if it had been submitted by an earlier process.
    pub async fn adopt(&self, backend_ref: impl Into<String>, spec: BackendJobSpec, status: JobStatus) {
        self.jobs.lock().await.insert(
            backend_ref.into(),
            SimulatedJob {
                spec,
                status,
                polls: 0,
                pinned: true,
            },
        );
    }

    pub async fn contains(&self, backend_ref: &str) -> bool {
        self.jobs.lock().await.contains_key(backend_ref)
    }

    pub async fn spec(&self, backend_ref: &str) -> Option<BackendJobSpec> {
        self.jobs
            .lock()
            .await
            .get(backend_ref)
            .map(|j| j.spec.clone())
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn status_poll_count(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    fn take_status_failure(&self) -> bool {
        if self.status_failing.load(Ordering::SeqCst) {
            return true;
        }
        self.status_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn submit(&self, spec: &BackendJobSpec) -> BackendResult<SubmitOutcome> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if !self.config.submit_delay.is_zero() {
            tokio::time::sleep(self.config.submit_delay).await;
        }
        if let Some(message) = self.submit_failure.lock().await.clone() {
            return Err(BackendError::Rejected(message));
        }

        let backend_ref = Self::backend_ref_for(&spec.provider_job_id);
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&backend_ref) {
            return Err(BackendError::Rejected(format!(
                "job {} already exists",
                spec.provider_job_id
            )));
        }
        jobs.insert(
            backend_ref.clone(),
            SimulatedJob {
                spec: spec.clone(),
                status: self.config.initial_status.unwrap_or(JobStatus::Scheduled),
                polls: 0,
                pinned: false,
            },
        );

        tracing::debug!(backend_ref = %backend_ref, image = %spec.image_uri, "Simulated job accepted");
        Ok(SubmitOutcome {
            backend_ref,
            initial_status: self.config.initial_status,
        })
    }

    async fn cancel(&self, backend_ref: &str) -> BackendResult<()> {
        tokio::time::sleep(self.config.ack_delay).await;
        if self.cancel_failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("cancel operation failed".to_string()));
        }
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(backend_ref)
            .ok_or_else(|| BackendError::NotFound(backend_ref.to_string()))?;
        job.status = JobStatus::Cancelled;
        job.pinned = true;
        Ok(())
    }

    async fn delete(&self, backend_ref: &str) -> BackendResult<()> {
        tokio::time::sleep(self.config.ack_delay).await;
        if self.delete_failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("delete operation failed".to_string()));
        }
        self.jobs
            .lock()
            .await
            .remove(backend_ref)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(backend_ref.to_string()))
    }

    async fn status(&self, backend_ref: &str) -> BackendResult<Option<JobStatus>> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        if !self.config.status_delay.is_zero() {
            tokio::time::sleep(self.config.status_delay).await;
        }
        if self.take_status_failure() {
            return Err(BackendError::Unavailable("status query failed".to_string()));
        }

        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(backend_ref)
            .ok_or_else(|| BackendError::NotFound(backend_ref.to_string()))?;

        if !job.pinned && !job.status.is_terminal() {
            job.polls += 1;
            job.status = if self.config.polls_until_done > 0
                && job.polls >= self.config.polls_until_done
            {
                JobStatus::Succeeded
            } else {
                JobStatus::Running
            };
        }

        Ok(Some(job.status))
    }
}
