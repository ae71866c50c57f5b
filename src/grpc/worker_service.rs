use std::sync::Arc;

use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::error::RelayError;
use crate::jobs::{Job, JobManager, SubmitJob};
use crate::proto::deployment_service_server::DeploymentService;
use crate::proto::{
    CancelJobRequest, CancelJobResponse, DeleteJobRequest, DeleteJobResponse, JobInfo,
    ListJobsRequest, ListJobsResponse, SubmitJobRequest, SubmitJobResponse, TENANT_HEADER,
};
use crate::resources::ResourceOverride;

/// Worker-side gRPC service.
///
/// The tenant is always taken from the `x-tenant-id` metadata set by the
/// gateway; any tenant id in the request body is ignored.
pub struct WorkerService {
    manager: Arc<JobManager>,
}

impl WorkerService {
    pub fn new(manager: Arc<JobManager>) -> Self {
        Self { manager }
    }
}

/// Read the tenant id from request metadata.
pub fn tenant_from_metadata(metadata: &MetadataMap) -> Result<String, Status> {
    metadata
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|tenant| !tenant.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Status::from(RelayError::MissingField("tenant_id")))
}

fn job_to_proto(job: &Job) -> JobInfo {
    JobInfo {
        job_id: job.job_id.clone(),
        tenant_id: job.tenant_id.clone(),
        image_uri: job.image_uri.clone(),
        status: job.status.to_string(),
        created_at: job.created_at.to_rfc3339(),
    }
}

#[tonic::async_trait]
impl DeploymentService for WorkerService {
    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> Result<Response<SubmitJobResponse>, Status> {
        let tenant_id = tenant_from_metadata(request.metadata())?;
        let req = request.into_inner();

        let submit = SubmitJob {
            tenant_id,
            image_uri: req.image_uri,
            env_vars: req.env_vars,
            resource_profile: Some(req.resource_profile).filter(|p| !p.is_empty()),
            resource_override: req.resource_override.map(ResourceOverride::from),
        };

        let job = self.manager.submit(submit).await?;
        Ok(Response::new(SubmitJobResponse {
            job_id: job.job_id,
            status: job.status.to_string(),
            worker_assigned: String::new(),
        }))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> Result<Response<ListJobsResponse>, Status> {
        let tenant_id = tenant_from_metadata(request.metadata())?;
        let jobs = self.manager.list(&tenant_id).await?;

        tracing::debug!(tenant_id = %tenant_id, count = jobs.len(), "Listed jobs");
        Ok(Response::new(ListJobsResponse {
            jobs: jobs.iter().map(job_to_proto).collect(),
        }))
    }

    async fn cancel_job(
        &self,
        request: Request<CancelJobRequest>,
    ) -> Result<Response<CancelJobResponse>, Status> {
        let tenant_id = tenant_from_metadata(request.metadata())?;
        let req = request.into_inner();

        let job = self.manager.cancel(&tenant_id, &req.job_id).await?;
        Ok(Response::new(CancelJobResponse {
            job_id: job.job_id,
            status: job.status.to_string(),
        }))
    }

    async fn delete_job(
        &self,
        request: Request<DeleteJobRequest>,
    ) -> Result<Response<DeleteJobResponse>, Status> {
        let tenant_id = tenant_from_metadata(request.metadata())?;
        let req = request.into_inner();

        self.manager.delete(&tenant_id, &req.job_id).await?;
        Ok(Response::new(DeleteJobResponse {
            message: format!("Job {} deleted", req.job_id),
            job_id: req.job_id,
        }))
    }
}
