use thiserror::Error;
use tonic::Status;

use crate::backend::BackendError;
use crate::jobs::JobStatus;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Cannot cancel job with status {0}; only PENDING, SCHEDULED, or RUNNING jobs can be cancelled")]
    NotCancellable(JobStatus),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Backend did not acknowledge {operation} within {timeout_ms}ms")]
    BackendTimeout {
        operation: &'static str,
        timeout_ms: u128,
    },

    #[error("Failed to submit batch job: {0}")]
    SubmissionFailed(BackendError),

    #[error("No worker available for tenant")]
    NoWorkerAvailable,

    #[error("Worker {worker} failed: {message}")]
    WorkerFailed { worker: String, message: String },

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Client errors are never retried and map to 4xx-style status codes.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RelayError::MissingField(_)
                | RelayError::InvalidArgument(_)
                | RelayError::JobNotFound(_)
                | RelayError::NotCancellable(_)
        )
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { tenant_id: _, job_id } => RelayError::JobNotFound(job_id),
            other => RelayError::Store(other),
        }
    }
}

impl From<RelayError> for Status {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::MissingField(_)
            | RelayError::InvalidArgument(_)
            | RelayError::NotCancellable(_) => Status::invalid_argument(message),
            RelayError::JobNotFound(_) => Status::not_found(message),
            _ => Status::internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
