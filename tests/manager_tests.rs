use std::sync::Arc;
use std::time::Duration;

use jobrelay::backend::{ExecutionBackend, SimulatedBackend, SimulatedConfig};
use jobrelay::config::PollerConfig;
use jobrelay::error::RelayError;
use jobrelay::jobs::{JobManager, JobStatus, PollerRegistry, SubmitJob, CANCELLED_BY_REQUEST};
use jobrelay::resources::{ResourceOverride, ResourceProfiles, ResourceRequirements};
use jobrelay::store::{JobStore, MemoryJobStore};

struct Fixture {
    store: Arc<MemoryJobStore>,
    backend: Arc<SimulatedBackend>,
    manager: JobManager,
}

fn small() -> ResourceRequirements {
    ResourceRequirements {
        cpu_millis: 250,
        memory_mib: 256,
        max_run_duration_seconds: 600,
    }
}

fn fixture_with(config: SimulatedConfig) -> Fixture {
    let store = Arc::new(MemoryJobStore::new());
    let backend = Arc::new(SimulatedBackend::new(config));
    let dyn_store: Arc<dyn JobStore> = store.clone();
    let dyn_backend: Arc<dyn ExecutionBackend> = backend.clone();

    // Long interval: pollers never tick during these tests.
    let pollers = PollerRegistry::new(
        dyn_store.clone(),
        dyn_backend.clone(),
        PollerConfig::default().with_interval(Duration::from_secs(3600)),
    );
    let profiles = ResourceProfiles::default().with_profile("small", small());
    let manager = JobManager::new(dyn_store, dyn_backend, Arc::new(profiles), pollers);

    Fixture {
        store,
        backend,
        manager,
    }
}

fn fixture() -> Fixture {
    fixture_with(SimulatedConfig {
        ack_delay: Duration::ZERO,
        ..Default::default()
    })
}

#[tokio::test]
async fn test_submit_records_pending_then_running() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "nginx:latest"))
        .await
        .unwrap();

    // Unknown initial backend status is treated as running.
    assert_eq!(job.status, JobStatus::Running);
    let backend_ref = job.backend_ref.clone().unwrap();
    assert!(f.backend.contains(&backend_ref).await);

    let stored = f.store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(stored.backend_ref.as_deref(), Some(backend_ref.as_str()));
    assert_eq!(stored.resources, ResourceRequirements::default());

    let history = f.manager.history("tenant-a", &job.job_id).await.unwrap();
    let steps: Vec<_> = history
        .iter()
        .map(|t| (t.from_status, t.to_status))
        .collect();
    assert_eq!(
        steps,
        vec![
            (None, JobStatus::Pending),
            (Some(JobStatus::Pending), JobStatus::Running),
        ]
    );

    assert!(f.manager.pollers().is_active(&job.key()).await);
}

#[tokio::test]
async fn test_submit_rejects_missing_fields_without_store_write() {
    let f = fixture();

    let err = f
        .manager
        .submit(SubmitJob::new("", "nginx:latest"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::MissingField("tenant_id")));
    assert!(err.is_client_error());

    let err = f
        .manager
        .submit(SubmitJob::new("tenant-a", "   "))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::MissingField("image_uri")));

    let err = f
        .manager
        .submit(SubmitJob::new("tenant-a", "nginx:latest").with_env("NOT_A_PAIR"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidArgument(_)));

    assert!(f.store.is_empty().await);
    assert_eq!(f.store.transition_count().await, 0);
    assert_eq!(f.backend.submit_count(), 0);
}

#[tokio::test]
async fn test_backend_rejection_leaves_failed_row_without_ref() {
    let f = fixture();
    f.backend.fail_submissions("quota exceeded").await;

    let err = f
        .manager
        .submit(SubmitJob::new("tenant-a", "nginx:latest"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::SubmissionFailed(_)));
    assert!(!err.is_client_error());

    let jobs = f.manager.list("tenant-a").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert!(jobs[0].backend_ref.is_none());

    let history = f.manager.history("tenant-a", &jobs[0].job_id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.from_status, Some(JobStatus::Pending));
    assert_eq!(last.to_status, JobStatus::Failed);
    assert!(last.reason.as_deref().unwrap().contains("quota exceeded"));

    assert_eq!(f.manager.pollers().active_count().await, 0);
}

#[tokio::test]
async fn test_reported_initial_status_is_kept() {
    let f = fixture_with(SimulatedConfig {
        initial_status: Some(JobStatus::Scheduled),
        ack_delay: Duration::ZERO,
        ..Default::default()
    });
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Scheduled);
    assert!(f.manager.pollers().is_active(&job.key()).await);
}

#[tokio::test]
async fn test_terminal_initial_status_starts_no_poller() {
    let f = fixture_with(SimulatedConfig {
        initial_status: Some(JobStatus::Succeeded),
        ack_delay: Duration::ZERO,
        ..Default::default()
    });
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.backend_ref.is_some());
    assert_eq!(f.manager.pollers().active_count().await, 0);
}

#[tokio::test]
async fn test_profile_and_override_reach_the_backend() {
    let f = fixture();
    let job = f
        .manager
        .submit(
            SubmitJob::new("tenant-a", "busybox")
                .with_env("MODE=batch")
                .with_profile("small")
                .with_override(ResourceOverride {
                    cpu_millis: Some(500),
                    ..Default::default()
                }),
        )
        .await
        .unwrap();

    let expected = ResourceRequirements {
        cpu_millis: 500,
        memory_mib: 256,
        max_run_duration_seconds: 600,
    };
    assert_eq!(job.resources, expected);

    let spec = f
        .backend
        .spec(job.backend_ref.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(spec.resources, expected);
    assert_eq!(spec.env_vars, vec!["MODE=batch"]);
    assert_eq!(spec.provider_job_id, job.provider_job_id);
}

#[tokio::test]
async fn test_transition_failure_does_not_roll_back_status() {
    let f = fixture();
    f.store.set_transitions_failing(true);

    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "nginx:latest"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Running);

    let stored = f.store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(f.store.transition_count().await, 0);
}

#[tokio::test]
async fn test_list_is_scoped_to_tenant() {
    let f = fixture();
    for _ in 0..3 {
        f.manager
            .submit(SubmitJob::new("tenant-a", "busybox"))
            .await
            .unwrap();
    }
    f.manager
        .submit(SubmitJob::new("tenant-b", "busybox"))
        .await
        .unwrap();

    let jobs = f.manager.list("tenant-a").await.unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.tenant_id == "tenant-a"));
    assert!(jobs.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    assert!(f.manager.list("tenant-c").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_running_job() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "nginx:latest"))
        .await
        .unwrap();

    let cancelled = f.manager.cancel("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let stored = f.store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(!f.manager.pollers().is_active(&job.key()).await);

    let backend_ref = job.backend_ref.unwrap();
    assert_eq!(
        f.backend.status(&backend_ref).await.unwrap(),
        Some(JobStatus::Cancelled)
    );

    let history = f.manager.history("tenant-a", &job.job_id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.from_status, Some(JobStatus::Running));
    assert_eq!(last.to_status, JobStatus::Cancelled);
    assert_eq!(last.reason.as_deref(), Some(CANCELLED_BY_REQUEST));
}

#[tokio::test]
async fn test_cancel_terminal_job_is_client_error() {
    let f = fixture_with(SimulatedConfig {
        initial_status: Some(JobStatus::Succeeded),
        ack_delay: Duration::ZERO,
        ..Default::default()
    });
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();

    let err = f.manager.cancel("tenant-a", &job.job_id).await.unwrap_err();
    assert!(matches!(err, RelayError::NotCancellable(JobStatus::Succeeded)));
    assert!(err.is_client_error());

    let stored = f.store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Succeeded);
}

#[tokio::test]
async fn test_cancel_twice_fails_the_second_time() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();

    f.manager.cancel("tenant-a", &job.job_id).await.unwrap();
    let err = f.manager.cancel("tenant-a", &job.job_id).await.unwrap_err();
    assert!(matches!(err, RelayError::NotCancellable(JobStatus::Cancelled)));
}

#[tokio::test]
async fn test_cancel_unknown_job_is_not_found() {
    let f = fixture();
    let err = f.manager.cancel("tenant-a", "nope").await.unwrap_err();
    assert!(matches!(err, RelayError::JobNotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn test_cancel_backend_failure_leaves_job_untouched() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    let transitions_before = f.store.transition_count().await;
    f.backend.set_cancel_failing(true);

    let err = f.manager.cancel("tenant-a", &job.job_id).await.unwrap_err();
    assert!(matches!(err, RelayError::Backend(_)));
    assert!(!err.is_client_error());

    let stored = f.store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert_eq!(f.store.transition_count().await, transitions_before);
    // Tracking resumes.
    assert!(f.manager.pollers().is_active(&job.key()).await);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_times_out_on_slow_backend() {
    let store = Arc::new(MemoryJobStore::new());
    let backend = Arc::new(SimulatedBackend::new(SimulatedConfig {
        ack_delay: Duration::from_secs(30),
        ..Default::default()
    }));
    let dyn_store: Arc<dyn JobStore> = store.clone();
    let dyn_backend: Arc<dyn ExecutionBackend> = backend.clone();
    let pollers = PollerRegistry::new(
        dyn_store.clone(),
        dyn_backend.clone(),
        PollerConfig::default().with_interval(Duration::from_secs(3600)),
    );
    let manager = JobManager::new(
        dyn_store,
        dyn_backend,
        Arc::new(ResourceProfiles::default()),
        pollers,
    )
    .with_backend_timeout(Duration::from_secs(5));

    let job = manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    let err = manager.cancel("tenant-a", &job.job_id).await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::BackendTimeout {
            operation: "cancel",
            timeout_ms: 5000
        }
    ));

    let stored = store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
}

#[tokio::test]
async fn test_delete_cascades_and_second_delete_is_not_found() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "nginx:latest"))
        .await
        .unwrap();
    let backend_ref = job.backend_ref.clone().unwrap();
    assert!(f.store.transition_count().await > 0);

    f.manager.delete("tenant-a", &job.job_id).await.unwrap();

    assert!(f.store.is_empty().await);
    assert_eq!(f.store.transition_count().await, 0);
    assert!(!f.backend.contains(&backend_ref).await);
    assert!(!f.manager.pollers().is_active(&job.key()).await);

    let err = f.manager.delete("tenant-a", &job.job_id).await.unwrap_err();
    assert!(matches!(err, RelayError::JobNotFound(_)));
}

#[tokio::test]
async fn test_delete_works_in_any_status() {
    let f = fixture();
    f.backend.fail_submissions("boom").await;
    let _ = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await;
    let failed = f.manager.list("tenant-a").await.unwrap().remove(0);
    assert_eq!(failed.status, JobStatus::Failed);

    // No backend ref: the backend is not contacted.
    f.manager.delete("tenant-a", &failed.job_id).await.unwrap();
    assert!(f.store.is_empty().await);
}

#[tokio::test]
async fn test_delete_backend_failure_keeps_row() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    f.backend.set_delete_failing(true);

    let err = f.manager.delete("tenant-a", &job.job_id).await.unwrap_err();
    assert!(matches!(err, RelayError::Backend(_)));

    let stored = f.store.get_job("tenant-a", &job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert!(f.manager.pollers().is_active(&job.key()).await);
}

#[tokio::test]
async fn test_delete_when_backend_already_forgot_the_job() {
    let f = fixture();
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    f.backend
        .delete(job.backend_ref.as_deref().unwrap())
        .await
        .unwrap();

    f.manager.delete("tenant-a", &job.job_id).await.unwrap();
    assert!(f.store.is_empty().await);
}

#[tokio::test]
async fn test_negative_override_is_rejected() {
    let f = fixture();
    let err = f
        .manager
        .submit(
            SubmitJob::new("tenant-a", "busybox").with_override(ResourceOverride {
                memory_mib: Some(-1),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::InvalidArgument(ref m) if m.contains("memory_mib")));
    assert!(err.is_client_error());
    assert!(f.store.is_empty().await);
    assert_eq!(f.backend.submit_count(), 0);
}

fn slow_submit_fixture() -> Fixture {
    fixture_with(SimulatedConfig {
        ack_delay: Duration::ZERO,
        submit_delay: Duration::from_millis(200),
        ..Default::default()
    })
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_submission_in_flight_stays_cancelled() {
    let f = slow_submit_fixture();

    let submit = f.manager.submit(SubmitJob::new("tenant-a", "busybox"));
    let cancel = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pending = f.manager.list("tenant-a").await.unwrap().remove(0);
        assert_eq!(pending.status, JobStatus::Pending);
        f.manager.cancel("tenant-a", &pending.job_id).await
    };
    let (submitted, cancelled) = tokio::join!(submit, cancel);

    let cancelled = cancelled.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    let submitted = submitted.unwrap();
    assert_eq!(submitted.status, JobStatus::Cancelled);

    let stored = f.store.get_job("tenant-a", &submitted.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(!f.manager.pollers().is_active(&stored.key()).await);

    let history: Vec<_> = f
        .manager
        .history("tenant-a", &stored.job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|t| (t.from_status, t.to_status))
        .collect();
    assert_eq!(
        history,
        vec![
            (None, JobStatus::Pending),
            (Some(JobStatus::Pending), JobStatus::Cancelled),
        ]
    );

    // The job the backend accepted late is cancelled too.
    let backend_ref = SimulatedBackend::backend_ref_for(&stored.provider_job_id);
    assert_eq!(
        f.backend.status(&backend_ref).await.unwrap(),
        Some(JobStatus::Cancelled)
    );
}

#[tokio::test(start_paused = true)]
async fn test_delete_while_submission_in_flight_removes_backend_job() {
    let f = slow_submit_fixture();

    let submit = f.manager.submit(SubmitJob::new("tenant-a", "busybox"));
    let delete = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pending = f.manager.list("tenant-a").await.unwrap().remove(0);
        f.manager.delete("tenant-a", &pending.job_id).await.unwrap();
        pending
    };
    let (submitted, pending) = tokio::join!(submit, delete);

    assert!(matches!(submitted, Err(RelayError::JobNotFound(ref id)) if *id == pending.job_id));
    assert!(f.store.is_empty().await);
    let backend_ref = SimulatedBackend::backend_ref_for(&pending.provider_job_id);
    assert!(!f.backend.contains(&backend_ref).await);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cancels_only_one_wins() {
    let f = fixture_with(SimulatedConfig {
        ack_delay: Duration::from_millis(50),
        ..Default::default()
    });
    let job = f
        .manager
        .submit(SubmitJob::new("tenant-a", "busybox"))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Running);

    let (a, b) = tokio::join!(
        f.manager.cancel("tenant-a", &job.job_id),
        f.manager.cancel("tenant-a", &job.job_id)
    );
    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one successful cancel, got {:?}", other),
    };
    assert_eq!(won.status, JobStatus::Cancelled);
    assert!(matches!(lost, RelayError::NotCancellable(JobStatus::Cancelled)));

    let cancellations = f
        .manager
        .history("tenant-a", &job.job_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.to_status == JobStatus::Cancelled)
        .count();
    assert_eq!(cancellations, 1);
    assert!(!f.manager.pollers().is_active(&job.key()).await);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_after_backend_accept_cancels_backend_job() {
    let f = slow_submit_fixture();

    let submit = f.manager.submit(SubmitJob::new("tenant-a", "busybox"));
    let outage = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pending = f.manager.list("tenant-a").await.unwrap().remove(0);
        f.store.set_unavailable(true);
        pending
    };
    let (submitted, pending) = tokio::join!(submit, outage);

    assert!(matches!(submitted, Err(RelayError::Store(_))));
    let backend_ref = SimulatedBackend::backend_ref_for(&pending.provider_job_id);
    assert_eq!(
        f.backend.status(&backend_ref).await.unwrap(),
        Some(JobStatus::Cancelled)
    );
}
