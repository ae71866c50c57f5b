//! Execution backend facade.
//!
//! The batch-execution service (a cloud job API) is external. Workers submit
//! container jobs to it, cancel or delete them, and poll their status by the
//! opaque reference it hands back on submission.

pub mod simulated;

use async_trait::async_trait;

use crate::jobs::JobStatus;
use crate::resources::ResourceRequirements;

pub use simulated::{SimulatedBackend, SimulatedConfig};

/// Everything the backend needs to run one container job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendJobSpec {
    /// Backend-compatible job id (lowercase, starts with a letter).
    pub provider_job_id: String,
    pub image_uri: String,
    pub env_vars: Vec<String>,
    pub resources: ResourceRequirements,
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub backend_ref: String,
    /// `None` when the backend does not report a recognisable status.
    pub initial_status: Option<JobStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("Backend rejected job: {0}")]
    Rejected(String),

    #[error("Backend resource not found: {0}")]
    NotFound(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[async_trait]
pub trait ExecutionBackend: Send + Sync + 'static {
    async fn submit(&self, spec: &BackendJobSpec) -> BackendResult<SubmitOutcome>;

    /// Cancel a job. Returns once the backend has acknowledged the cancellation.
    async fn cancel(&self, backend_ref: &str) -> BackendResult<()>;

    /// Delete a job. Returns once the backend has acknowledged the deletion.
    async fn delete(&self, backend_ref: &str) -> BackendResult<()>;

    /// Current status of a job. `None` when the backend reports an unknown state.
    async fn status(&self, backend_ref: &str) -> BackendResult<Option<JobStatus>>;
}
