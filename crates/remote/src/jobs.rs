//! Asynchronous job model and tracking.
//!
//! The remote exposes long-running work (inventory retrieval, archive
//! retrieval) as jobs that must be polled. The tracker finds jobs of a
//! given shape, filters completed inventories by freshness, and waits for
//! completion under a bounded retry policy.

use crate::error::{RemoteError, RemoteResult};
use crate::inventory;
use crate::traits::{VaultStore, read_to_end};
use icebox_core::InventorySnapshot;
use std::sync::Arc;
use std::time::Duration;

/// What a job produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Full catalog listing for a vault.
    Inventory,
    /// Payload retrieval for one archive.
    Retrieval { archive_id: String },
}

/// Remote-reported job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// One remote job, as last observed.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub vault: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// When the job was submitted (unix seconds).
    pub creation_date: i64,
    /// When the job finished, if it has.
    pub completion_date: Option<i64>,
    /// Size in bytes of the output payload; reported for succeeded
    /// retrieval jobs.
    pub archive_size: Option<u64>,
}

impl Job {
    /// Whether the job has reached a terminal state (success or failure).
    pub fn completed(&self) -> bool {
        !matches!(self.status, JobStatus::InProgress)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded)
    }
}

/// Bounded polling policy for job-completion waits.
///
/// The wait itself is a plain sleep-and-recheck loop; expressing the cadence
/// as a value keeps the wait function scheduler-agnostic and the bound
/// explicit — a wait can never be indefinite.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Pause between poll rounds.
    pub interval: Duration,
    /// Maximum number of poll rounds before giving up.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on total time spent waiting.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 144 polls at 10 minutes: give a queued job a full day.
        Self::new(Duration::from_secs(600), 144)
    }
}

/// Finds, filters, and awaits remote jobs for one vault store.
#[derive(Clone)]
pub struct JobTracker {
    store: Arc<dyn VaultStore>,
}

impl JobTracker {
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self { store }
    }

    /// The underlying vault store.
    pub fn store(&self) -> &Arc<dyn VaultStore> {
        &self.store
    }

    /// Inventory jobs eligible for a freshness window of `max_age_hours`.
    ///
    /// A still-pending job is always eligible regardless of age — it will
    /// be fresh when it completes. A succeeded job qualifies only when it
    /// completed within the window; `max_age_hours == 0` therefore means
    /// "pending jobs only". Failed jobs are never eligible.
    pub async fn find_inventory_jobs(
        &self,
        vault: &str,
        max_age_hours: u64,
        now: i64,
    ) -> RemoteResult<Vec<Job>> {
        let jobs = self.store.list_jobs(vault).await?;
        let cutoff = now - (max_age_hours as i64) * 3600;
        Ok(jobs
            .into_iter()
            .filter(|job| job.kind == JobKind::Inventory)
            .filter(|job| match job.status {
                JobStatus::InProgress => true,
                JobStatus::Succeeded => {
                    max_age_hours > 0 && job.completion_date.is_some_and(|done| done > cutoff)
                }
                JobStatus::Failed => false,
            })
            .collect())
    }

    /// Retrieval jobs targeting one archive, any status.
    pub async fn find_retrieval_jobs(
        &self,
        vault: &str,
        archive_id: &str,
    ) -> RemoteResult<Vec<Job>> {
        let jobs = self.store.list_jobs(vault).await?;
        Ok(jobs
            .into_iter()
            .filter(|job| {
                matches!(&job.kind, JobKind::Retrieval { archive_id: id } if id == archive_id)
            })
            .collect())
    }

    /// The most recently completed succeeded job, if any.
    pub fn newest_completed(jobs: &[Job]) -> Option<&Job> {
        jobs.iter()
            .filter(|job| job.succeeded())
            .max_by_key(|job| job.completion_date)
    }

    /// Whether any job is still in progress.
    pub fn has_pending(jobs: &[Job]) -> bool {
        jobs.iter().any(|job| !job.completed())
    }

    /// Block until one of the tracked jobs succeeds.
    ///
    /// Every tracked handle is refreshed on every round — several jobs of
    /// the same kind can be in flight for one vault and any of them may
    /// finish first. Fails with `Timeout` once the policy's attempts are
    /// exhausted, or with `Upstream` if every tracked job has failed (no
    /// amount of further polling would help).
    pub async fn await_completion(
        &self,
        vault: &str,
        job_ids: &[String],
        policy: &RetryPolicy,
    ) -> RemoteResult<Job> {
        let mut attempts_left = policy.max_attempts;
        loop {
            let mut jobs = Vec::with_capacity(job_ids.len());
            for id in job_ids {
                jobs.push(self.store.get_job(vault, id).await?);
            }

            if let Some(job) = Self::newest_completed(&jobs) {
                return Ok(job.clone());
            }
            if !jobs.is_empty() && jobs.iter().all(|job| job.status == JobStatus::Failed) {
                return Err(RemoteError::Upstream(format!(
                    "all {} tracked jobs failed",
                    jobs.len()
                )));
            }

            if attempts_left == 0 {
                return Err(RemoteError::Timeout {
                    waited_secs: policy.max_wait().as_secs(),
                });
            }
            attempts_left -= 1;
            tokio::time::sleep(policy.interval).await;
        }
    }

    /// Fetch and decode the inventory produced by a succeeded inventory
    /// job.
    pub async fn fetch_inventory(&self, vault: &str, job: &Job) -> RemoteResult<InventorySnapshot> {
        let output = self.store.fetch_job_output(vault, &job.id, None).await?;
        let payload = read_to_end(output).await?;
        inventory::parse_inventory(&payload, job.creation_date)
    }
}
