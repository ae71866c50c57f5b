use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use jobrelay::backend::SimulatedConfig;
use jobrelay::config::{GatewayConfig, PollerConfig, WorkerConfig};
use jobrelay::node::{GatewayNode, WorkerNode};
use jobrelay::proto::deployment_service_client::DeploymentServiceClient;
use jobrelay::proto::{
    CancelJobRequest, DeleteJobRequest, ListJobsRequest, ResourceOverride, SubmitJobRequest,
    WORKER_HEADER,
};
use jobrelay::routing::DEFAULT_REPLICAS;
use jobrelay::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "jobrelay")]
#[command(version)]
#[command(about = "Tenant-routed batch job gateway and workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a worker node
    Worker(WorkerArgs),

    /// Start the gateway
    Gateway(GatewayArgs),

    /// Job management commands (talk to the gateway)
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "8081")]
    port: u16,

    /// Port for the health/status HTTP endpoint (optional)
    #[arg(long)]
    http_port: Option<u16>,

    /// Resource profile file (JSON)
    #[arg(long)]
    profiles: Option<PathBuf>,

    /// Seconds between two status polls of a job
    #[arg(long, default_value = "5")]
    poll_interval_secs: u64,

    /// Consecutive failed status polls before a job is marked FAILED (0 = never)
    #[arg(long, default_value = "20")]
    max_poll_failures: u32,

    /// Seconds to wait for the backend to acknowledge a cancel or delete
    #[arg(long, default_value = "60")]
    backend_timeout_secs: u64,

    /// Status polls before a simulated job completes (0 = never)
    #[arg(long, default_value = "3")]
    sim_polls_until_done: u32,
}

#[derive(Parser, Debug)]
struct GatewayArgs {
    /// Port to listen on for gRPC
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Port for the health/routing HTTP endpoint (optional)
    #[arg(long)]
    http_port: Option<u16>,

    /// Worker addresses (comma-separated, format: "host:port")
    /// Example: "10.128.0.2:8081,10.128.0.3:8081"
    #[arg(long)]
    workers: String,

    /// Ring positions per worker
    #[arg(long, default_value_t = DEFAULT_REPLICAS)]
    replicas: usize,

    /// Seconds to wait for a worker to answer a forwarded call
    #[arg(long, default_value = "120")]
    forward_timeout_secs: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Gateway address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Tenant id
    #[arg(long, short = 't')]
    tenant: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a container job
    Submit {
        /// Container image URI (e.g., "nginx:latest")
        image: String,

        /// Environment variable in KEY=VALUE form (repeatable)
        #[arg(long = "env", short = 'e')]
        env_vars: Vec<String>,

        /// Named resource profile
        #[arg(long)]
        profile: Option<String>,

        /// Override CPU (millicores)
        #[arg(long)]
        cpu_millis: Option<i64>,

        /// Override memory (MiB)
        #[arg(long)]
        memory_mib: Option<i64>,

        /// Override maximum run duration (seconds)
        #[arg(long)]
        max_run_duration_secs: Option<i64>,
    },
    /// List the tenant's jobs
    List,
    /// Cancel a running job
    Cancel {
        /// The job ID (UUID)
        job_id: String,
    },
    /// Delete a job and its history
    Delete {
        /// The job ID (UUID)
        job_id: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobSubmitOutput {
    job_id: String,
    status: String,
    worker: String,
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    status: String,
    image_uri: String,
    created_at: String,
}

#[derive(Serialize)]
struct JobListOutput {
    worker: Option<String>,
    jobs: Vec<JobListItem>,
}

#[derive(Serialize)]
struct JobActionOutput {
    job_id: String,
    status: Option<String>,
    message: Option<String>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn parse_workers(workers: &str) -> Vec<String> {
    workers
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn listen_addr(port: u16) -> Result<SocketAddr, std::net::AddrParseError> {
    format!("0.0.0.0:{}", port).parse()
}

fn worker_of<T>(response: &tonic::Response<T>) -> Option<String> {
    response
        .metadata()
        .get(WORKER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// =============================================================================
// Server Implementation
// =============================================================================

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let poller = PollerConfig::default()
        .with_interval(Duration::from_secs(args.poll_interval_secs.max(1)))
        .with_max_consecutive_failures(Some(args.max_poll_failures).filter(|n| *n > 0));

    let config = WorkerConfig {
        listen_addr: listen_addr(args.port)?,
        http_addr: args.http_port.map(listen_addr).transpose()?,
        profiles_path: args.profiles,
        poller,
        backend_timeout: Duration::from_secs(args.backend_timeout_secs),
        backend: SimulatedConfig {
            polls_until_done: args.sim_polls_until_done,
            ..SimulatedConfig::default()
        },
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        http_addr = ?config.http_addr,
        profiles = ?config.profiles_path,
        poll_interval = ?config.poller.interval,
        "Starting jobrelay worker"
    );

    let shutdown = install_shutdown_handler()?;
    let node = WorkerNode::new(config).await?;
    node.run(shutdown).await
}

async fn run_gateway(args: GatewayArgs) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let config = GatewayConfig {
        listen_addr: listen_addr(args.port)?,
        http_addr: args.http_port.map(listen_addr).transpose()?,
        workers: parse_workers(&args.workers),
        replicas: args.replicas,
        forward_timeout: Duration::from_secs(args.forward_timeout_secs),
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        http_addr = ?config.http_addr,
        workers = ?config.workers,
        "Starting jobrelay gateway"
    );

    let shutdown = install_shutdown_handler()?;
    let node = GatewayNode::new(config)?;
    node.run(shutdown).await
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_job_command(
    client: ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let channel = Channel::from_shared(client.addr.clone())?.connect().await?;
    let mut rpc = DeploymentServiceClient::new(channel);
    let tenant_id = client.tenant.clone();

    match command {
        JobCommands::Submit {
            image,
            env_vars,
            profile,
            cpu_millis,
            memory_mib,
            max_run_duration_secs,
        } => {
            let resource_override = if cpu_millis.is_some()
                || memory_mib.is_some()
                || max_run_duration_secs.is_some()
            {
                Some(ResourceOverride {
                    cpu_millis,
                    memory_mib,
                    max_run_duration_seconds: max_run_duration_secs,
                })
            } else {
                None
            };

            let resp = rpc
                .submit_job(SubmitJobRequest {
                    tenant_id,
                    image_uri: image,
                    env_vars,
                    resource_profile: profile.unwrap_or_default(),
                    resource_override,
                })
                .await?
                .into_inner();

            match client.output {
                OutputFormat::Json => {
                    let output = JobSubmitOutput {
                        job_id: resp.job_id,
                        status: resp.status,
                        worker: resp.worker_assigned,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Table => {
                    println!("Job submitted successfully!");
                    println!("Job ID: {}", resp.job_id);
                    println!("Status: {}", resp.status);
                    println!("Worker: {}", resp.worker_assigned);
                }
            }
        }
        JobCommands::List => {
            let response = rpc.list_jobs(ListJobsRequest { tenant_id }).await?;
            let worker = worker_of(&response);
            let jobs: Vec<JobListItem> = response
                .into_inner()
                .jobs
                .into_iter()
                .map(|job| JobListItem {
                    job_id: job.job_id,
                    status: job.status,
                    image_uri: job.image_uri,
                    created_at: job.created_at,
                })
                .collect();

            match client.output {
                OutputFormat::Json => {
                    let output = JobListOutput { worker, jobs };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Table => {
                    if jobs.is_empty() {
                        println!("No jobs found.");
                    } else {
                        println!(
                            "{:<38} {:<10} {:<26} IMAGE",
                            "JOB ID", "STATUS", "CREATED"
                        );
                        println!("{}", "-".repeat(96));
                        for job in &jobs {
                            println!(
                                "{:<38} {:<10} {:<26} {}",
                                job.job_id, job.status, job.created_at, job.image_uri
                            );
                        }
                    }
                }
            }
        }
        JobCommands::Cancel { job_id } => {
            let resp = rpc
                .cancel_job(CancelJobRequest { tenant_id, job_id })
                .await?
                .into_inner();
            print_action(
                &client.output,
                JobActionOutput {
                    job_id: resp.job_id,
                    status: Some(resp.status),
                    message: None,
                },
            )?;
        }
        JobCommands::Delete { job_id } => {
            let resp = rpc
                .delete_job(DeleteJobRequest { tenant_id, job_id })
                .await?
                .into_inner();
            print_action(
                &client.output,
                JobActionOutput {
                    job_id: resp.job_id,
                    status: None,
                    message: Some(resp.message),
                },
            )?;
        }
    }
    Ok(())
}

fn print_action(
    format: &OutputFormat,
    output: JobActionOutput,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        OutputFormat::Table => {
            println!("Job ID: {}", output.job_id);
            if let Some(status) = output.status {
                println!("Status: {}", status);
            }
            if let Some(message) = output.message {
                println!("{}", message);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    match args.command {
        Commands::Worker(worker_args) => run_worker(worker_args).await,
        Commands::Gateway(gateway_args) => run_gateway(gateway_args).await,
        Commands::Job { client, command } => {
            if let Err(e) = handle_job_command(client, command).await {
                match e.downcast_ref::<tonic::Status>() {
                    Some(status) => eprintln!("Error: {}", status.message()),
                    None => eprintln!("Error: {}", e),
                }
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
