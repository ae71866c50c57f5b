//! Wire types for the `jobrelay.v1.DeploymentService` RPC surface.
//!
//! The same service is exposed by the gateway (tenant id in the body, used
//! for routing) and by every worker (tenant id in the `x-tenant-id` request
//! metadata, body value ignored).

/// Metadata key carrying the tenant id on worker-facing calls.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Response metadata key naming the worker that served a gateway call.
pub const WORKER_HEADER: &str = "x-worker-assigned";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitJobRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub image_uri: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub env_vars: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "4")]
    pub resource_profile: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "5")]
    pub resource_override: ::core::option::Option<ResourceOverride>,
}

/// Per-field resource override. Unset fields keep the profile value.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ResourceOverride {
    #[prost(int64, optional, tag = "1")]
    pub cpu_millis: ::core::option::Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub memory_mib: ::core::option::Option<i64>,
    #[prost(int64, optional, tag = "3")]
    pub max_run_duration_seconds: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitJobResponse {
    #[prost(string, tag = "1")]
    pub job_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub status: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub worker_assigned: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListJobsRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobInfo {
    #[prost(string, tag = "1")]
    pub job_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub tenant_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub image_uri: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub status: ::prost::alloc::string::String,
    /// RFC 3339 timestamp.
    #[prost(string, tag = "5")]
    pub created_at: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListJobsResponse {
    #[prost(message, repeated, tag = "1")]
    pub jobs: ::prost::alloc::vec::Vec<JobInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelJobRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub job_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelJobResponse {
    #[prost(string, tag = "1")]
    pub job_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub status: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteJobRequest {
    #[prost(string, tag = "1")]
    pub tenant_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub job_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteJobResponse {
    #[prost(string, tag = "1")]
    pub job_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

include!(concat!(env!("OUT_DIR"), "/jobrelay.v1.DeploymentService.rs"));
