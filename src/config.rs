use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::SimulatedConfig;
use crate::routing::DEFAULT_REPLICAS;

/// Status polling behaviour for in-flight jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Delay between two status queries of the same job.
    pub interval: Duration,
    /// Consecutive failed status queries after which the job is marked
    /// FAILED. `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_consecutive_failures: Some(20),
        }
    }
}

impl PollerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: Option<u32>) -> Self {
        self.max_consecutive_failures = max;
        self
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    /// Health and status HTTP endpoint (optional).
    pub http_addr: Option<SocketAddr>,
    /// JSON resource profile file. Built-in defaults when absent.
    pub profiles_path: Option<PathBuf>,
    pub poller: PollerConfig,
    /// Upper bound on waiting for a backend cancel/delete acknowledgment.
    pub backend_timeout: Duration,
    pub backend: SimulatedConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8081"
                .parse()
                .expect("default listen address is valid"),
            http_addr: None,
            profiles_path: None,
            poller: PollerConfig::default(),
            backend_timeout: Duration::from_secs(60),
            backend: SimulatedConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_profiles(mut self, path: impl Into<PathBuf>) -> Self {
        self.profiles_path = Some(path.into());
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub http_addr: Option<SocketAddr>,
    /// Worker addresses in host:port format.
    pub workers: Vec<String>,
    /// Ring positions per worker.
    pub replicas: usize,
    /// Deadline for a forwarded call.
    pub forward_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            http_addr: None,
            workers: Vec::new(),
            replicas: DEFAULT_REPLICAS,
            forward_timeout: Duration::from_secs(120),
        }
    }
}

impl GatewayConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_worker(mut self, addr: impl Into<String>) -> Self {
        self.workers.push(addr.into());
        self
    }
}
