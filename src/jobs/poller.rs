//! Background status pollers, one per in-flight job.
//!
//! The [`PollerRegistry`] is the single owner of every poller task and its
//! cancellation token. Registration is check-then-insert under one lock, so
//! the submission path and the restart scan can race on the same key and
//! still end up with exactly one poller.
//!
//! Each registry entry carries a generation number. A poller that exits on
//! its own only removes the entry if the generation still matches, and
//! [`PollerRegistry::stop`] removes the entry before cancelling, so an entry
//! is removed exactly once whichever side gets there first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::ExecutionBackend;
use crate::config::PollerConfig;
use crate::jobs::{JobKey, JobStatus, JobTransition};
use crate::store::{JobStore, StoreError};

/// Reason recorded when a job is failed after too many status query errors.
pub const POLLING_EXHAUSTED: &str = "polling exhausted";

struct PollerHandle {
    generation: u64,
    token: CancellationToken,
    status: watch::Receiver<JobStatus>,
    task: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    config: PollerConfig,
    pollers: Mutex<HashMap<JobKey, PollerHandle>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl Inner {
    async fn deregister(&self, key: &JobKey, generation: u64) {
        let mut pollers = self.pollers.lock().await;
        if pollers
            .get(key)
            .is_some_and(|handle| handle.generation == generation)
        {
            pollers.remove(key);
            tracing::debug!(job = %key, "Poller deregistered");
        }
    }
}

/// Keyed registry of job pollers.
///
/// Cloning is cheap and every clone refers to the same registry.
#[derive(Clone)]
pub struct PollerRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PollerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerRegistry")
            .field("config", &self.inner.config)
            .field("shutdown", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl PollerRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        config: PollerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                config,
                pollers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Start polling a job. Returns false if a poller for the key already
    /// exists, the status is terminal, or the registry is shut down.
    pub async fn start(&self, key: JobKey, backend_ref: String, status: JobStatus) -> bool {
        if status.is_terminal() || self.inner.shutdown.is_cancelled() {
            return false;
        }

        let mut pollers = self.inner.pollers.lock().await;
        // Shutdown drains while holding this lock.
        if self.inner.shutdown.is_cancelled() {
            return false;
        }
        if pollers.contains_key(&key) {
            tracing::debug!(job = %key, "Poller already running");
            return false;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.inner.shutdown.child_token();
        let (status_tx, status_rx) = watch::channel(status);

        let poller = Poller {
            key: key.clone(),
            backend_ref,
            status,
            generation,
            token: token.clone(),
            status_tx,
            inner: Arc::clone(&self.inner),
        };
        let task = tokio::spawn(poller.run());

        tracing::info!(job = %key, status = %status, "Poller started");
        pollers.insert(
            key,
            PollerHandle {
                generation,
                token,
                status: status_rx,
                task,
            },
        );
        true
    }

    /// Stop a poller and wait for its task to exit. Returns false if no
    /// poller was registered for the key.
    pub async fn stop(&self, key: &JobKey) -> bool {
        let handle = self.inner.pollers.lock().await.remove(key);
        let Some(handle) = handle else {
            return false;
        };

        handle.token.cancel();
        if let Err(e) = handle.task.await {
            tracing::warn!(job = %key, error = %e, "Poller task ended abnormally");
        }
        tracing::info!(job = %key, "Poller stopped");
        true
    }

    /// Stop every poller and refuse new ones.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<(JobKey, PollerHandle)> =
            self.inner.pollers.lock().await.drain().collect();
        let count = handles.len();
        for (key, handle) in handles {
            handle.token.cancel();
            if let Err(e) = handle.task.await {
                tracing::warn!(job = %key, error = %e, "Poller task ended abnormally");
            }
        }
        tracing::info!(count, "All pollers stopped");
    }

    pub async fn is_active(&self, key: &JobKey) -> bool {
        self.inner.pollers.lock().await.contains_key(key)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.pollers.lock().await.len()
    }

    /// Last status observed by the poller for `key`.
    pub async fn last_status(&self, key: &JobKey) -> Option<JobStatus> {
        self.inner
            .pollers
            .lock()
            .await
            .get(key)
            .map(|handle| *handle.status.borrow())
    }

    /// Active pollers with their last observed status, sorted by key.
    pub async fn snapshot(&self) -> Vec<(JobKey, JobStatus)> {
        let pollers = self.inner.pollers.lock().await;
        let mut entries: Vec<(JobKey, JobStatus)> = pollers
            .iter()
            .map(|(key, handle)| (key.clone(), *handle.status.borrow()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

enum Flow {
    Continue,
    Finished,
}

struct Poller {
    key: JobKey,
    backend_ref: String,
    status: JobStatus,
    generation: u64,
    token: CancellationToken,
    status_tx: watch::Sender<JobStatus>,
    inner: Arc<Inner>,
}

impl Poller {
    async fn run(mut self) {
        let interval = self.inner.config.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Flow::Finished = self.tick(&mut failures).await {
                break;
            }
        }

        self.inner.deregister(&self.key, self.generation).await;
    }

    async fn tick(&mut self, failures: &mut u32) -> Flow {
        let query = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Flow::Finished,
            result = self.inner.backend.status(&self.backend_ref) => result,
        };
        let observed = match query {
            Ok(status) => {
                *failures = 0;
                status
            }
            Err(e) => {
                *failures += 1;
                tracing::warn!(
                    job = %self.key,
                    error = %e,
                    consecutive_failures = *failures,
                    "Status query failed"
                );
                let cap = self.inner.config.max_consecutive_failures;
                return match cap {
                    Some(max) if *failures >= max => {
                        tracing::error!(job = %self.key, failures = *failures, "Giving up on job status");
                        self.apply(JobStatus::Failed, Some(POLLING_EXHAUSTED.to_string()))
                            .await
                    }
                    _ => Flow::Continue,
                };
            }
        };

        match observed {
            Some(status) if status != self.status => {
                // A stop that arrived during the query wins over the observation.
                if self.token.is_cancelled() {
                    return Flow::Finished;
                }
                self.apply(status, None).await
            }
            _ => Flow::Continue,
        }
    }

    async fn apply(&mut self, status: JobStatus, reason: Option<String>) -> Flow {
        let store = &self.inner.store;
        match store
            .update_status(&self.key.tenant_id, &self.key.job_id, self.status, status)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                tracing::info!(job = %self.key, "Job row is gone, stopping poller");
                return Flow::Finished;
            }
            Err(StoreError::StatusConflict { actual, .. }) => {
                tracing::info!(
                    job = %self.key,
                    expected = %self.status,
                    actual = %actual,
                    "Job status changed elsewhere, stopping poller"
                );
                return Flow::Finished;
            }
            Err(e) => {
                tracing::warn!(job = %self.key, error = %e, "Failed to persist status, will retry");
                return Flow::Continue;
            }
        }

        let transition = JobTransition::new(&self.key, Some(self.status), status, reason);
        if let Err(e) = store.record_transition(&transition).await {
            tracing::warn!(job = %self.key, error = %e, "Failed to record state transition");
        }

        tracing::info!(job = %self.key, from = %self.status, to = %status, "Job status changed");
        self.status = status;
        self.status_tx.send_replace(status);

        if status.is_terminal() {
            Flow::Finished
        } else {
            Flow::Continue
        }
    }
}
