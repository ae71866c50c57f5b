use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::proto::deployment_service_server::{DeploymentService, DeploymentServiceServer};

/// Serves one `DeploymentService` implementation until `shutdown` fires.
pub struct GrpcServer<S> {
    listener: TcpListener,
    service: S,
}

impl<S> GrpcServer<S>
where
    S: DeploymentService,
{
    pub fn new(listener: TcpListener, service: S) -> Self {
        Self { listener, service }
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), tonic::transport::Error> {
        let addr = self.listener.local_addr().ok();
        tracing::info!(addr = ?addr, "Starting gRPC server");

        Server::builder()
            .add_service(DeploymentServiceServer::new(self.service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), async move {
                shutdown.cancelled().await;
            })
            .await?;

        tracing::info!(addr = ?addr, "gRPC server stopped");
        Ok(())
    }
}
