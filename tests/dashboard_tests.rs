use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use jobrelay::backend::{ExecutionBackend, SimulatedBackend, SimulatedConfig};
use jobrelay::config::{GatewayConfig, PollerConfig};
use jobrelay::dashboard::{gateway_router, worker_router, GatewayState, WorkerState};
use jobrelay::grpc::GatewayService;
use jobrelay::jobs::{JobKey, JobStatus, PollerRegistry};
use jobrelay::store::{JobStore, MemoryJobStore};

fn registry() -> PollerRegistry {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let backend: Arc<dyn ExecutionBackend> =
        Arc::new(SimulatedBackend::new(SimulatedConfig::default()));
    PollerRegistry::new(
        store,
        backend,
        PollerConfig::default().with_interval(Duration::from_secs(3600)),
    )
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_worker_health() {
    let app = worker_router(WorkerState {
        pollers: registry(),
    });
    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_pollers_endpoint_lists_active_pollers() {
    let pollers = registry();
    pollers
        .start(JobKey::new("tenant-b", "j2"), "ref-2".to_string(), JobStatus::Scheduled)
        .await;
    pollers
        .start(JobKey::new("tenant-a", "j1"), "ref-1".to_string(), JobStatus::Running)
        .await;

    let app = worker_router(WorkerState { pollers });
    let (status, body) = get(app, "/api/pollers").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["active"], 2);
    assert_eq!(json["pollers"][0]["tenant_id"], "tenant-a");
    assert_eq!(json["pollers"][0]["last_status"], "RUNNING");
    assert_eq!(json["pollers"][1]["job_id"], "j2");
    assert_eq!(json["pollers"][1]["last_status"], "SCHEDULED");
}

#[tokio::test]
async fn test_pollers_endpoint_empty() {
    let app = worker_router(WorkerState {
        pollers: registry(),
    });
    let (_, body) = get(app, "/api/pollers").await;
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["active"], 0);
    assert_eq!(json["pollers"].as_array().unwrap().len(), 0);
}

fn gateway_app() -> (Router, GatewayService) {
    let config = GatewayConfig::default()
        .with_worker("10.128.0.1:8081")
        .with_worker("10.128.0.2:8081");
    let gateway = GatewayService::new(&config).unwrap();
    (
        gateway_router(GatewayState {
            gateway: gateway.clone(),
        }),
        gateway,
    )
}

#[tokio::test]
async fn test_gateway_health_and_workers() {
    let (app, _) = gateway_app();
    let (status, body) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    let (status, body) = get(app, "/api/workers").await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["replicas"], 160);
    assert_eq!(
        json["workers"],
        serde_json::json!(["10.128.0.1:8081", "10.128.0.2:8081"])
    );
}

#[tokio::test]
async fn test_gateway_route_matches_ring() {
    let (app, gateway) = gateway_app();
    let (status, body) = get(app, "/api/route/tenant-42").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["tenant_id"], "tenant-42");
    assert_eq!(json["worker"], gateway.route("tenant-42").unwrap());
}
