//! Job lifecycle: the job model, the lifecycle manager, status pollers and
//! the restart scan that re-attaches them.

pub mod job;
pub mod manager;
pub mod poller;
pub mod resume;

pub use job::{provider_job_id, Job, JobKey, JobStatus, JobTransition, ParseStatusError};
pub use manager::{JobManager, SubmitJob, CANCELLED_BY_REQUEST};
pub use poller::{PollerRegistry, POLLING_EXHAUSTED};
pub use resume::{resume_active_pollers, ResumeReport};
