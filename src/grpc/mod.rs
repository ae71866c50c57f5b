pub mod gateway_service;
pub mod server;
pub mod worker_service;

pub use gateway_service::GatewayService;
pub use server::GrpcServer;
pub use worker_service::WorkerService;
