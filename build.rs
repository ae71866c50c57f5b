//! Generates the `DeploymentService` client and server stubs.
//!
//! Messages are declared by hand in `src/proto.rs` with `prost` derives, so
//! the service is described with tonic's manual builder and no `protoc` is
//! needed at build time.

use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::proto::{}", input))
        .output_type(format!("crate::proto::{}", output))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    let service = Service::builder()
        .name("DeploymentService")
        .package("jobrelay.v1")
        .method(unary(
            "submit_job",
            "SubmitJob",
            "SubmitJobRequest",
            "SubmitJobResponse",
        ))
        .method(unary(
            "list_jobs",
            "ListJobs",
            "ListJobsRequest",
            "ListJobsResponse",
        ))
        .method(unary(
            "cancel_job",
            "CancelJob",
            "CancelJobRequest",
            "CancelJobResponse",
        ))
        .method(unary(
            "delete_job",
            "DeleteJob",
            "DeleteJobRequest",
            "DeleteJobResponse",
        ))
        .build();

    Builder::new().compile(&[service]);
    println!("cargo:rerun-if-changed=build.rs");
}
