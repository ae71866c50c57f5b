use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::jobs::{Job, JobKey, JobStatus, JobTransition};
use crate::store::{JobStore, StoreError, StoreResult};

const DEFAULT_MAX_JOBS: usize = 10_000;

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<JobKey, Job>,
    transitions: HashMap<JobKey, Vec<JobTransition>>,
}

/// In-memory job store.
///
/// Every operation takes the state lock once, which gives the single-row
/// atomicity the facade promises. Two switches simulate store outages for
/// failure-path tests.
#[derive(Debug)]
pub struct MemoryJobStore {
    state: RwLock<State>,
    max_jobs: usize,
    unavailable: AtomicBool,
    transitions_failing: AtomicBool,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            max_jobs,
            unavailable: AtomicBool::new(false),
            transitions_failing: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only `record_transition` fail.
    pub fn set_transitions_failing(&self, failing: bool) {
        self.transitions_failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.jobs.is_empty()
    }

    /// Total transition records across all jobs.
    pub async fn transition_count(&self) -> usize {
        self.state
            .read()
            .await
            .transitions
            .values()
            .map(Vec::len)
            .sum()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }
}

fn expect_status<'a>(
    state: &'a mut State,
    tenant_id: &str,
    job_id: &str,
    expected: JobStatus,
) -> StoreResult<&'a mut Job> {
    let job = state
        .jobs
        .get_mut(&JobKey::new(tenant_id, job_id))
        .ok_or_else(|| StoreError::not_found(tenant_id, job_id))?;
    if job.status != expected {
        return Err(StoreError::StatusConflict {
            job_id: job_id.to_string(),
            expected,
            actual: job.status,
        });
    }
    Ok(job)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if state.jobs.len() >= self.max_jobs {
            return Err(StoreError::CapacityExceeded);
        }
        let key = job.key();
        if state.jobs.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        state.jobs.insert(key, job.clone());
        Ok(())
    }

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> StoreResult<Job> {
        self.check_available()?;
        let state = self.state.read().await;
        state
            .jobs
            .get(&JobKey::new(tenant_id, job_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(tenant_id, job_id))
    }

    async fn list_jobs(&self, tenant_id: &str) -> StoreResult<Vec<Job>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn list_tenants(&self) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let state = self.state.read().await;
        let tenants: BTreeSet<&str> = state.jobs.keys().map(|k| k.tenant_id.as_str()).collect();
        Ok(tenants.into_iter().map(str::to_string).collect())
    }

    async fn update_status(
        &self,
        tenant_id: &str,
        job_id: &str,
        expected: JobStatus,
        status: JobStatus,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let job = expect_status(&mut state, tenant_id, job_id, expected)?;
        job.status = status;
        Ok(())
    }

    async fn update_status_and_backend_ref(
        &self,
        tenant_id: &str,
        job_id: &str,
        expected: JobStatus,
        status: JobStatus,
        backend_ref: &str,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let job = expect_status(&mut state, tenant_id, job_id, expected)?;
        job.status = status;
        job.backend_ref = Some(backend_ref.to_string());
        Ok(())
    }

    async fn delete_job(&self, tenant_id: &str, job_id: &str) -> StoreResult<()> {
        self.check_available()?;
        let key = JobKey::new(tenant_id, job_id);
        let mut state = self.state.write().await;
        if state.jobs.remove(&key).is_none() {
            return Err(StoreError::not_found(tenant_id, job_id));
        }
        state.transitions.remove(&key);
        Ok(())
    }

    async fn record_transition(&self, transition: &JobTransition) -> StoreResult<()> {
        self.check_available()?;
        if self.transitions_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "transition table offline".to_string(),
            ));
        }
        let key = JobKey::new(&transition.tenant_id, &transition.job_id);
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&key) {
            return Err(StoreError::not_found(&key.tenant_id, &key.job_id));
        }
        state
            .transitions
            .entry(key)
            .or_default()
            .push(transition.clone());
        Ok(())
    }

    async fn list_transitions(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> StoreResult<Vec<JobTransition>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(state
            .transitions
            .get(&JobKey::new(tenant_id, job_id))
            .cloned()
            .unwrap_or_default())
    }
}
