use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::backend::{ExecutionBackend, SimulatedBackend};
use crate::config::{GatewayConfig, WorkerConfig};
use crate::dashboard::{gateway_router, run_http, worker_router, GatewayState, WorkerState};
use crate::grpc::{GatewayService, GrpcServer, WorkerService};
use crate::jobs::{resume_active_pollers, JobManager, PollerRegistry};
use crate::resources::{ResourceError, ResourceProfiles};
use crate::store::{JobStore, MemoryJobStore};

pub type NodeResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A worker: owns the lifecycle manager and pollers for the tenants routed
/// to it.
pub struct WorkerNode {
    pub config: WorkerConfig,
    pub store: Arc<dyn JobStore>,
    pub backend: Arc<dyn ExecutionBackend>,
    pub pollers: PollerRegistry,
    pub manager: Arc<JobManager>,
}

impl WorkerNode {
    /// Build a worker backed by the in-memory store and the simulated backend.
    ///
    /// # Errors
    ///
    /// Fails if the configured resource profile file cannot be read or parsed.
    pub async fn new(config: WorkerConfig) -> Result<Self, ResourceError> {
        let profiles = match &config.profiles_path {
            Some(path) => {
                let profiles = ResourceProfiles::load(path).await?;
                tracing::info!(path = %path.display(), "Loaded resource profiles");
                profiles
            }
            None => ResourceProfiles::default(),
        };
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let backend: Arc<dyn ExecutionBackend> =
            Arc::new(SimulatedBackend::new(config.backend.clone()));
        Ok(Self::with_parts(config, store, backend, profiles))
    }

    pub fn with_parts(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        profiles: ResourceProfiles,
    ) -> Self {
        let pollers = PollerRegistry::new(store.clone(), backend.clone(), config.poller.clone());
        let manager = JobManager::new(
            store.clone(),
            backend.clone(),
            Arc::new(profiles),
            pollers.clone(),
        )
        .with_backend_timeout(config.backend_timeout);

        Self {
            config,
            store,
            backend,
            pollers,
            manager: Arc::new(manager),
        }
    }

    /// Run the worker until `shutdown` fires.
    ///
    /// 1. Re-attaches pollers to every live job found in the store
    /// 2. Optionally spawns the HTTP health endpoint
    /// 3. Serves gRPC (blocking)
    /// 4. Stops every poller
    pub async fn run(self, shutdown: CancellationToken) -> NodeResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_on(listener, shutdown).await
    }

    /// Like [`WorkerNode::run`] on an already bound listener.
    pub async fn run_on(self, listener: TcpListener, shutdown: CancellationToken) -> NodeResult<()> {
        resume_active_pollers(&self.store, &self.pollers).await?;

        if let Some(http_addr) = self.config.http_addr {
            let app = worker_router(WorkerState {
                pollers: self.pollers.clone(),
            });
            tokio::spawn(run_http(http_addr, app, shutdown.clone()));
        }

        let server = GrpcServer::new(listener, WorkerService::new(self.manager.clone()));
        let result = server.run(shutdown).await;

        self.pollers.shutdown().await;
        result?;
        Ok(())
    }
}

/// The gateway: routes every call to the worker owning its tenant.
pub struct GatewayNode {
    pub config: GatewayConfig,
    pub service: GatewayService,
}

impl GatewayNode {
    /// # Errors
    ///
    /// Refuses an empty worker list or a worker address that is not a valid URI.
    pub fn new(config: GatewayConfig) -> crate::error::Result<Self> {
        let service = GatewayService::new(&config)?;
        Ok(Self { config, service })
    }

    pub async fn run(self, shutdown: CancellationToken) -> NodeResult<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_on(listener, shutdown).await
    }

    pub async fn run_on(self, listener: TcpListener, shutdown: CancellationToken) -> NodeResult<()> {
        if let Some(http_addr) = self.config.http_addr {
            let app = gateway_router(GatewayState {
                gateway: self.service.clone(),
            });
            tokio::spawn(run_http(http_addr, app, shutdown.clone()));
        }

        GrpcServer::new(listener, self.service)
            .run(shutdown)
            .await?;
        Ok(())
    }
}
