use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::jobs::poller::PollerRegistry;
use crate::store::JobStore;

/// Outcome of a restart scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeReport {
    pub tenants_scanned: usize,
    /// Pollers registered by this scan.
    pub resumed: usize,
    /// Live jobs that already had a poller.
    pub already_tracked: usize,
    /// Live jobs that never reached the backend.
    pub skipped_without_ref: usize,
    /// Tenants whose jobs could not be listed.
    pub failed_tenants: Vec<String>,
}

/// Re-attach a poller to every live job that has a backend reference.
///
/// Must run before the worker accepts requests. Failing to list tenants is
/// fatal; a tenant whose jobs cannot be listed is logged and skipped.
pub async fn resume_active_pollers(
    store: &Arc<dyn JobStore>,
    pollers: &PollerRegistry,
) -> Result<ResumeReport> {
    let tenants = store.list_tenants().await?;
    let mut report = ResumeReport {
        tenants_scanned: tenants.len(),
        ..Default::default()
    };

    for tenant_id in tenants {
        let jobs = match store.list_jobs(&tenant_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(tenant_id = %tenant_id, error = %e, "Failed to list jobs for tenant");
                report.failed_tenants.push(tenant_id);
                continue;
            }
        };

        for job in jobs {
            if job.status.is_terminal() {
                continue;
            }
            let Some(backend_ref) = job.backend_ref.clone() else {
                tracing::warn!(
                    job_id = %job.job_id,
                    tenant_id = %tenant_id,
                    status = %job.status,
                    "Skipping job without backend reference"
                );
                report.skipped_without_ref += 1;
                continue;
            };

            if pollers.start(job.key(), backend_ref, job.status).await {
                report.resumed += 1;
            } else {
                report.already_tracked += 1;
            }
        }
    }

    tracing::info!(
        tenants = report.tenants_scanned,
        resumed = report.resumed,
        skipped = report.skipped_without_ref,
        "Resumed active job pollers"
    );
    Ok(report)
}
