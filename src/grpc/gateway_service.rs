use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};

use crate::config::GatewayConfig;
use crate::error::{RelayError, Result};
use crate::proto::deployment_service_client::DeploymentServiceClient;
use crate::proto::deployment_service_server::DeploymentService;
use crate::proto::{
    CancelJobRequest, CancelJobResponse, DeleteJobRequest, DeleteJobResponse, ListJobsRequest,
    ListJobsResponse, SubmitJobRequest, SubmitJobResponse, TENANT_HEADER, WORKER_HEADER,
};
use crate::routing::HashRing;

type WorkerClient = DeploymentServiceClient<Channel>;

/// Gateway-facing gRPC service.
///
/// Validates the request, picks the tenant's worker on the hash ring and
/// forwards the call with the tenant id attached as metadata. There is no
/// retry and no failover: a tenant is pinned to one worker.
#[derive(Clone)]
pub struct GatewayService {
    ring: Arc<HashRing>,
    /// One lazily connected client per worker address.
    clients: HashMap<String, WorkerClient>,
    forward_timeout: Duration,
}

impl GatewayService {
    /// Build the ring and a client for every configured worker.
    ///
    /// Connections are established on first use, so workers may come up
    /// after the gateway.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        if config.workers.is_empty() {
            return Err(RelayError::NoWorkerAvailable);
        }

        let ring = HashRing::with_replicas(config.workers.iter().cloned(), config.replicas);
        let mut clients = HashMap::with_capacity(config.workers.len());
        for worker in ring.workers() {
            let endpoint = Endpoint::from_shared(format!("http://{}", worker))?;
            clients.insert(worker.to_string(), DeploymentServiceClient::new(endpoint.connect_lazy()));
        }

        tracing::info!(
            workers = clients.len(),
            replicas = ring.replicas(),
            "Gateway routing table built"
        );
        Ok(Self {
            ring: Arc::new(ring),
            clients,
            forward_timeout: config.forward_timeout,
        })
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// Worker owning `tenant_id`.
    pub fn route(&self, tenant_id: &str) -> Result<&str> {
        self.ring
            .assign(tenant_id)
            .ok_or(RelayError::NoWorkerAvailable)
    }

    async fn forward<Req, Resp, F, Fut>(
        &self,
        tenant_id: &str,
        body: Req,
        call: F,
    ) -> std::result::Result<(String, Response<Resp>), Status>
    where
        F: FnOnce(WorkerClient, Request<Req>) -> Fut,
        Fut: Future<Output = std::result::Result<Response<Resp>, Status>>,
    {
        let worker = self.route(tenant_id)?.to_string();
        let client = self
            .clients
            .get(&worker)
            .cloned()
            .ok_or_else(|| RelayError::Internal(format!("no client for worker {}", worker)))?;

        let tenant_value: MetadataValue<Ascii> = tenant_id.parse().map_err(|_| {
            RelayError::InvalidArgument("tenant_id must be printable ASCII".to_string())
        })?;
        let mut request = Request::new(body);
        request.metadata_mut().insert(TENANT_HEADER, tenant_value);

        tracing::debug!(tenant_id = %tenant_id, worker = %worker, "Forwarding request");
        let response = match tokio::time::timeout(self.forward_timeout, call(client, request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(status)) => {
                tracing::warn!(worker = %worker, code = ?status.code(), error = %status.message(), "Worker call failed");
                return Err(RelayError::WorkerFailed {
                    worker,
                    message: status.message().to_string(),
                }
                .into());
            }
            Err(_) => {
                tracing::warn!(worker = %worker, "Worker call timed out");
                return Err(RelayError::WorkerFailed {
                    worker,
                    message: format!("no response within {:?}", self.forward_timeout),
                }
                .into());
            }
        };

        Ok((worker, response))
    }
}

fn require(value: &str, field: &'static str) -> std::result::Result<(), Status> {
    if value.trim().is_empty() {
        return Err(RelayError::MissingField(field).into());
    }
    Ok(())
}

fn annotate<T>(mut response: Response<T>, worker: &str) -> Response<T> {
    if let Ok(value) = worker.parse::<MetadataValue<Ascii>>() {
        response.metadata_mut().insert(WORKER_HEADER, value);
    }
    response
}

#[tonic::async_trait]
impl DeploymentService for GatewayService {
    async fn submit_job(
        &self,
        request: Request<SubmitJobRequest>,
    ) -> std::result::Result<Response<SubmitJobResponse>, Status> {
        let req = request.into_inner();
        require(&req.tenant_id, "tenant_id")?;
        require(&req.image_uri, "image_uri")?;

        let tenant_id = req.tenant_id.clone();
        let (worker, response) = self
            .forward(&tenant_id, req, |mut client, request| async move {
                client.submit_job(request).await
            })
            .await?;

        let mut body = response.into_inner();
        body.worker_assigned = worker.clone();
        tracing::info!(tenant_id = %tenant_id, job_id = %body.job_id, worker = %worker, "Job submitted");
        Ok(annotate(Response::new(body), &worker))
    }

    async fn list_jobs(
        &self,
        request: Request<ListJobsRequest>,
    ) -> std::result::Result<Response<ListJobsResponse>, Status> {
        let req = request.into_inner();
        require(&req.tenant_id, "tenant_id")?;

        let tenant_id = req.tenant_id.clone();
        let (worker, response) = self
            .forward(&tenant_id, req, |mut client, request| async move {
                client.list_jobs(request).await
            })
            .await?;
        Ok(annotate(Response::new(response.into_inner()), &worker))
    }

    async fn cancel_job(
        &self,
        request: Request<CancelJobRequest>,
    ) -> std::result::Result<Response<CancelJobResponse>, Status> {
        let req = request.into_inner();
        require(&req.tenant_id, "tenant_id")?;
        require(&req.job_id, "job_id")?;

        let tenant_id = req.tenant_id.clone();
        let (worker, response) = self
            .forward(&tenant_id, req, |mut client, request| async move {
                client.cancel_job(request).await
            })
            .await?;
        Ok(annotate(Response::new(response.into_inner()), &worker))
    }

    async fn delete_job(
        &self,
        request: Request<DeleteJobRequest>,
    ) -> std::result::Result<Response<DeleteJobResponse>, Status> {
        let req = request.into_inner();
        require(&req.tenant_id, "tenant_id")?;
        require(&req.job_id, "job_id")?;

        let tenant_id = req.tenant_id.clone();
        let (worker, response) = self
            .forward(&tenant_id, req, |mut client, request| async move {
                client.delete_job(request).await
            })
            .await?;
        Ok(annotate(Response::new(response.into_inner()), &worker))
    }
}
