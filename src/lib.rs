pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod grpc;
pub mod jobs;
pub mod node;
pub mod proto;
pub mod resources;
pub mod routing;
pub mod shutdown;
pub mod store;
