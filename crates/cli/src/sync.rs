//! Vault synchronization: fetch an inventory and reconcile it.

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use anyhow::Context;
use icebox_cache::{Anomaly, ReconcilePolicy};
use icebox_remote::{Job, JobTracker};

/// Options for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Completed inventory jobs older than this many hours are ignored;
    /// zero forces a fresh inventory job.
    pub max_age_hours: u64,
    /// Repair divergence (overwrite renames, purge disappeared archives)
    /// instead of only warning.
    pub fix: bool,
    /// Block on pending jobs instead of reporting `Retryable`.
    pub wait: bool,
}

/// Bring the cache up to date with one inventory snapshot for `vault`.
///
/// Uses a fresh-enough completed inventory job when one exists; otherwise
/// joins a pending job or submits a new one. Without `wait` the joined or
/// queued job is reported as `Retryable` — the caller re-invokes later.
pub async fn vault_sync(
    ctx: &AppContext,
    vault: &str,
    opts: &SyncOptions,
) -> AppResult<Vec<Anomaly>> {
    let jobs = ctx
        .tracker
        .find_inventory_jobs(vault, opts.max_age_hours, ctx.now())
        .await?;

    if let Some(job) = JobTracker::newest_completed(&jobs) {
        return reconcile_inventory_job(ctx, vault, job, opts.fix).await;
    }

    if JobTracker::has_pending(&jobs) {
        if !opts.wait {
            return Err(AppError::Retryable(format!(
                "inventory job still pending for vault '{vault}'"
            )));
        }
        let pending: Vec<String> = jobs
            .iter()
            .filter(|job| !job.completed())
            .map(|job| job.id.clone())
            .collect();
        let job = ctx
            .tracker
            .await_completion(vault, &pending, &ctx.retry_policy())
            .await?;
        return reconcile_inventory_job(ctx, vault, &job, opts.fix).await;
    }

    let job = ctx.tracker.store().submit_inventory_job(vault).await?;
    tracing::info!(vault, job_id = %job.id, "queued inventory job");
    if !opts.wait {
        return Err(AppError::Retryable(format!(
            "queued inventory job for vault '{vault}'"
        )));
    }
    let job = ctx
        .tracker
        .await_completion(vault, &[job.id], &ctx.retry_policy())
        .await?;
    reconcile_inventory_job(ctx, vault, &job, opts.fix).await
}

async fn reconcile_inventory_job(
    ctx: &AppContext,
    vault: &str,
    job: &Job,
    fix: bool,
) -> AppResult<Vec<Anomaly>> {
    let snapshot = ctx
        .tracker
        .fetch_inventory(vault, job)
        .await
        .map_err(|e| {
            AppError::Failure(anyhow::Error::new(e).context("failed to fetch inventory output"))
        })?;
    let policy = ReconcilePolicy {
        fix,
        inventory_lag_secs: ctx.config.sync.inventory_lag_secs,
    };
    let anomalies = ctx
        .cache
        .apply_snapshot(&snapshot, &policy)
        .await
        .context("failed to reconcile inventory into the cache")?;
    tracing::debug!(
        vault,
        job_id = %job.id,
        entries = snapshot.entries.len(),
        anomalies = anomalies.len(),
        "inventory reconciled"
    );
    Ok(anomalies)
}
