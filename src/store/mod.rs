//! Job store facade.
//!
//! The persistent store is an external collaborator: a transactional,
//! strongly consistent relational database. Workers only see it through the
//! narrow record-oriented [`JobStore`] trait. Single-row updates are atomic;
//! nothing here assumes cross-row transactions.
//!
//! [`MemoryJobStore`] is the in-process implementation used by the worker
//! binary in development and by the test suite.

pub mod memory;

use async_trait::async_trait;

use crate::jobs::{Job, JobStatus, JobTransition};

pub use memory::MemoryJobStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Job not found: {tenant_id}/{job_id}")]
    NotFound { tenant_id: String, job_id: String },

    #[error("Job {job_id} is {actual}, expected {expected}")]
    StatusConflict {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Job store is at capacity")]
    CapacityExceeded,

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(tenant_id: &str, job_id: &str) -> Self {
        StoreError::NotFound {
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new job row.
    async fn insert_job(&self, job: &Job) -> StoreResult<()>;

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> StoreResult<Job>;

    /// All jobs of a tenant, oldest first.
    async fn list_jobs(&self, tenant_id: &str) -> StoreResult<Vec<Job>>;

    /// Every tenant that owns at least one job.
    async fn list_tenants(&self) -> StoreResult<Vec<String>>;

    /// Move a job from `expected` to `status`. Fails with
    /// [`StoreError::StatusConflict`] and writes nothing if the stored status
    /// is no longer `expected`.
    async fn update_status(
        &self,
        tenant_id: &str,
        job_id: &str,
        expected: JobStatus,
        status: JobStatus,
    ) -> StoreResult<()>;

    /// Set status and backend reference in a single conditional row update.
    async fn update_status_and_backend_ref(
        &self,
        tenant_id: &str,
        job_id: &str,
        expected: JobStatus,
        status: JobStatus,
        backend_ref: &str,
    ) -> StoreResult<()>;

    /// Delete a job row together with its transition history.
    async fn delete_job(&self, tenant_id: &str, job_id: &str) -> StoreResult<()>;

    async fn record_transition(&self, transition: &JobTransition) -> StoreResult<()>;

    /// Transition history of a job, in the order it was recorded.
    async fn list_transitions(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> StoreResult<Vec<JobTransition>>;
}
