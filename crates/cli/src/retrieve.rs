//! Archive retrieval.
//!
//! Retrieval is job-based like everything else: find or submit a retrieval
//! job for the archive, then (once it succeeds) download the output. File
//! targets are written atomically — a temp file in the destination
//! directory, truncated to the upstream-reported size, then renamed over
//! the target — so a pre-existing longer file ends up byte-exact.

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use anyhow::{Context, anyhow};
use futures::StreamExt;
use icebox_core::Reference;
use icebox_remote::{Job, JobTracker};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Stdout sentinel for `-o`.
pub const STDOUT_TARGET: &str = "-";

/// Options for one retrieval invocation.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Block on retrieval jobs instead of reporting `Retryable`.
    pub wait: bool,
    /// Outputs larger than this are fetched in sequential byte ranges.
    pub multipart_size: u64,
    /// Explicit output target (`-` for stdout). Defaults to the basename of
    /// the reference string.
    pub output: Option<String>,
}

/// Retrieve one archive.
pub async fn archive_retrieve_one(
    ctx: &AppContext,
    vault: &str,
    raw_ref: &str,
    opts: &RetrieveOptions,
) -> AppResult<()> {
    let reference = Reference::parse(raw_ref);
    let archive_id = ctx
        .cache
        .archive_id(vault, &reference)
        .await
        .map_err(|_| AppError::Failure(anyhow!("archive '{raw_ref}' not found")))?;

    let jobs = ctx.tracker.find_retrieval_jobs(vault, &archive_id).await?;

    if let Some(job) = JobTracker::newest_completed(&jobs) {
        return download(ctx, vault, job, raw_ref, opts).await;
    }

    if JobTracker::has_pending(&jobs) {
        if !opts.wait {
            return Err(AppError::Retryable(format!(
                "retrieval job still pending for archive '{raw_ref}'"
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
        return download(ctx, vault, &job, raw_ref, opts).await;
    }

    let job = ctx
        .tracker
        .store()
        .submit_retrieval_job(vault, &archive_id)
        .await?;
    tracing::info!(vault, archive_id, job_id = %job.id, "queued retrieval job");
    if !opts.wait {
        return Err(AppError::Retryable(format!(
            "queued retrieval job for archive '{raw_ref}'"
        )));
    }
    let job = ctx
        .tracker
        .await_completion(vault, &[job.id], &ctx.retry_policy())
        .await?;
    download(ctx, vault, &job, raw_ref, opts).await
}

/// Retrieve several archives, continuing past individual failures.
///
/// Outcomes combine per the weakest-retryable rule: if any sub-operation
/// was retryable the whole invocation is one `Retryable` carrying every
/// sub-message; otherwise the strongest failure observed propagates.
pub async fn archive_retrieve_many(
    ctx: &AppContext,
    vault: &str,
    raw_refs: &[String],
    opts: &RetrieveOptions,
) -> AppResult<()> {
    let mut messages = Vec::new();
    let mut retryable = 0usize;
    let mut failed = 0usize;

    for raw_ref in raw_refs {
        match archive_retrieve_one(ctx, vault, raw_ref, opts).await {
            Ok(()) => messages.push(format!("retrieved archive '{raw_ref}'")),
            Err(AppError::Retryable(message)) => {
                retryable += 1;
                messages.push(message);
            }
            Err(AppError::Failure(err)) => {
                failed += 1;
                messages.push(format!("{err:#}"));
            }
        }
    }

    if retryable > 0 {
        Err(AppError::Retryable(messages.join("\n")))
    } else if failed > 0 {
        Err(AppError::Failure(anyhow!("{}", messages.join("\n"))))
    } else {
        Ok(())
    }
}

async fn download(
    ctx: &AppContext,
    vault: &str,
    job: &Job,
    raw_ref: &str,
    opts: &RetrieveOptions,
) -> AppResult<()> {
    let size = job
        .archive_size
        .ok_or_else(|| AppError::Failure(anyhow!("retrieval job '{}' reports no size", job.id)))?;

    match opts.output.as_deref() {
        Some(STDOUT_TARGET) => download_to_stdout(ctx, vault, job).await,
        Some(path) => download_to_file(ctx, vault, job, size, opts, Path::new(path)).await,
        None => {
            // Default target: the basename of the reference string.
            let target = Path::new(raw_ref)
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| {
                    AppError::Failure(anyhow!(
                        "cannot derive output filename from '{raw_ref}'; use -o"
                    ))
                })?;
            download_to_file(ctx, vault, job, size, opts, &target).await
        }
    }
}

async fn download_to_file(
    ctx: &AppContext,
    vault: &str,
    job: &Job,
    size: u64,
    opts: &RetrieveOptions,
    target: &Path,
) -> AppResult<()> {
    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let tmp = parent.join(format!(".icebox-tmp-{}", Uuid::new_v4()));

    let result = write_output(ctx, vault, job, size, opts, &tmp).await;
    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }

    tokio::fs::rename(&tmp, target)
        .await
        .with_context(|| format!("failed to move output into place at {}", target.display()))?;
    tracing::info!(vault, target = %target.display(), bytes = size, "archive retrieved");
    Ok(())
}

async fn write_output(
    ctx: &AppContext,
    vault: &str,
    job: &Job,
    size: u64,
    opts: &RetrieveOptions,
    tmp: &Path,
) -> AppResult<()> {
    let mut file = tokio::fs::File::create(tmp)
        .await
        .with_context(|| format!("failed to create output file {}", tmp.display()))?;

    if size > opts.multipart_size {
        let mut start = 0u64;
        while start < size {
            let end = (start + opts.multipart_size).min(size) - 1;
            copy_stream(
                ctx.tracker
                    .store()
                    .fetch_job_output(vault, &job.id, Some((start, end)))
                    .await?,
                &mut file,
            )
            .await?;
            start = end + 1;
        }
    } else {
        copy_stream(
            ctx.tracker.store().fetch_job_output(vault, &job.id, None).await?,
            &mut file,
        )
        .await?;
    }

    // Force the exact upstream-reported length, whatever the stream
    // delivered.
    file.set_len(size)
        .await
        .context("failed to truncate output to archive size")?;
    file.sync_all().await.context("failed to flush output file")?;
    Ok(())
}

async fn download_to_stdout(ctx: &AppContext, vault: &str, job: &Job) -> AppResult<()> {
    let mut stdout = tokio::io::stdout();
    let mut stream = ctx
        .tracker
        .store()
        .fetch_job_output(vault, &job.id, None)
        .await?;
    while let Some(chunk) = stream.next().await {
        stdout
            .write_all(&chunk?)
            .await
            .context("failed to write to stdout")?;
    }
    stdout.flush().await.context("failed to flush stdout")?;
    Ok(())
}

async fn copy_stream(
    mut stream: icebox_remote::ByteStream,
    file: &mut tokio::fs::File,
) -> AppResult<()> {
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?)
            .await
            .context("failed to write output chunk")?;
    }
    Ok(())
}
