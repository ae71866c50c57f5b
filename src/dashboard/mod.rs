//! Health and introspection HTTP endpoints.
//!
//! Workers expose their active pollers, the gateway exposes its routing
//! table. Both answer `/health` with a plain `OK`.

use std::net::SocketAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::grpc::GatewayService;
use crate::jobs::PollerRegistry;

#[derive(Clone)]
pub struct WorkerState {
    pub pollers: PollerRegistry,
}

#[derive(Clone)]
pub struct GatewayState {
    pub gateway: GatewayService,
}

#[derive(Serialize)]
struct PollerResponse {
    tenant_id: String,
    job_id: String,
    last_status: String,
}

#[derive(Serialize)]
struct PollersResponse {
    active: usize,
    pollers: Vec<PollerResponse>,
}

#[derive(Serialize)]
struct WorkersResponse {
    replicas: usize,
    workers: Vec<String>,
}

#[derive(Serialize)]
struct RouteResponse {
    tenant_id: String,
    worker: String,
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn worker_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/pollers", get(pollers_handler))
        .layer(cors())
        .with_state(state)
}

pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/workers", get(workers_handler))
        .route("/api/route/:tenant_id", get(route_handler))
        .layer(cors())
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` fires. Bind and serve errors are
/// logged; the HTTP endpoint is never fatal to the node.
pub async fn run_http(addr: SocketAddr, app: Router, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "HTTP server failed");
    }
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn pollers_handler(State(state): State<WorkerState>) -> impl IntoResponse {
    let pollers: Vec<PollerResponse> = state
        .pollers
        .snapshot()
        .await
        .into_iter()
        .map(|(key, status)| PollerResponse {
            tenant_id: key.tenant_id,
            job_id: key.job_id,
            last_status: status.to_string(),
        })
        .collect();

    Json(PollersResponse {
        active: pollers.len(),
        pollers,
    })
}

async fn workers_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let ring = state.gateway.ring();
    Json(WorkersResponse {
        replicas: ring.replicas(),
        workers: ring.workers().map(str::to_string).collect(),
    })
}

async fn route_handler(
    State(state): State<GatewayState>,
    Path(tenant_id): Path<String>,
) -> impl IntoResponse {
    match state.gateway.route(&tenant_id) {
        Ok(worker) => (
            StatusCode::OK,
            Json(RouteResponse {
                worker: worker.to_string(),
                tenant_id,
            }),
        )
            .into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}
