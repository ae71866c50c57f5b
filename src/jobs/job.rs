use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resources::ResourceRequirements;

/// Lifecycle status of a job.
///
/// `Pending`, `Scheduled` and `Running` are live; `Succeeded`, `Failed` and
/// `Cancelled` are terminal and never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Only live jobs can be cancelled.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Running
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for JobStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// A job tracked by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// Identifier handed to the execution backend.
    pub provider_job_id: String,
    pub tenant_id: String,
    pub image_uri: String,
    pub env_vars: Vec<String>,
    pub status: JobStatus,
    /// Set once the backend has accepted the job.
    pub backend_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resources: ResourceRequirements,
}

impl Job {
    /// Create a new PENDING job with a freshly minted id.
    pub fn new(
        tenant_id: impl Into<String>,
        image_uri: impl Into<String>,
        env_vars: Vec<String>,
        resources: ResourceRequirements,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            job_id: id.to_string(),
            provider_job_id: provider_job_id(&id),
            tenant_id: tenant_id.into(),
            image_uri: image_uri.into(),
            env_vars,
            status: JobStatus::Pending,
            backend_ref: None,
            created_at: Utc::now(),
            resources,
        }
    }

    /// Registry key of the poller tracking this job.
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.tenant_id, &self.job_id)
    }

    /// Whether a poller should be tracking this job.
    pub fn needs_polling(&self) -> bool {
        !self.status.is_terminal() && self.backend_ref.is_some()
    }
}

/// Derive the backend-compatible job id: lowercase, starts with a letter,
/// no underscores.
pub fn provider_job_id(id: &Uuid) -> String {
    format!("job-{}", id.simple())
}

/// `(tenant_id, job_id)` pair identifying a job and its poller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobKey {
    pub tenant_id: String,
    pub job_id: String,
}

impl JobKey {
    pub fn new(tenant_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            job_id: job_id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.job_id)
    }
}

/// Append-only record of a single status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTransition {
    pub transition_id: String,
    pub job_id: String,
    pub tenant_id: String,
    /// `None` only for the transition that created the job.
    pub from_status: Option<JobStatus>,
    pub to_status: JobStatus,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobTransition {
    pub fn new(
        key: &JobKey,
        from_status: Option<JobStatus>,
        to_status: JobStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            transition_id: Uuid::new_v4().to_string(),
            job_id: key.job_id.clone(),
            tenant_id: key.tenant_id.clone(),
            from_status,
            to_status,
            reason,
            timestamp: Utc::now(),
        }
    }
}
