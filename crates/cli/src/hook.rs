//! git-annex hook integration.
//!
//! Exposes the four-action contract a presence-probing backup tool drives:
//! `store`, `retrieve`, `remove`, `checkpresent`. Zero-byte annex keys are
//! handled locally as sentinels — the remote never sees them: storing and
//! removing them succeed as no-ops, retrieving one creates an empty file,
//! and checking one always reports presence.

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::presence::{PresenceOutcome, PresenceRequest, check_present};
use crate::retrieve::{RetrieveOptions, archive_retrieve_one};
use crate::upload::archive_upload;
use anyhow::{Context, anyhow};
use clap::ValueEnum;
use icebox_core::Reference;
use std::path::Path;

/// Hook actions, as invoked by the annex special remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HookAction {
    Store,
    Retrieve,
    Remove,
    Checkpresent,
}

/// Whether an annex key names a zero-length object, judged by the `s<size>`
/// field between the first and last `-`-separated fields. Keys without a
/// parsable size field (pre-v2 annex) are assumed non-empty.
pub fn key_is_empty(key: &str) -> bool {
    let fields: Vec<&str> = key.split('-').collect();
    if fields.len() < 3 {
        return false;
    }
    for field in &fields[1..fields.len() - 1] {
        if let Some(rest) = field.strip_prefix('s')
            && let Ok(size) = rest.parse::<u64>()
        {
            return size == 0;
        }
    }
    false
}

/// Run one hook action. On `checkpresent`, prints the key to stdout when
/// the archive is considered present and stays silent otherwise.
pub async fn run_hook(
    ctx: &AppContext,
    vault: &str,
    action: HookAction,
    key: &str,
    file: Option<&Path>,
) -> AppResult<()> {
    let empty = key_is_empty(key);
    match action {
        HookAction::Store => {
            if empty {
                // Storing an empty key is always a success.
                return Ok(());
            }
            let file = required_file(file, "store")?;
            archive_upload(ctx, vault, file, Some(key)).await?;
            Ok(())
        }
        HookAction::Retrieve => {
            let file = required_file(file, "retrieve")?;
            if empty {
                tokio::fs::write(file, b"")
                    .await
                    .with_context(|| format!("failed to create empty file {file}"))?;
                return Ok(());
            }
            let opts = RetrieveOptions {
                wait: false,
                multipart_size: 8 * 1024 * 1024,
                output: Some(file.to_string()),
            };
            archive_retrieve_one(ctx, vault, key, &opts).await
        }
        HookAction::Remove => {
            if empty {
                // Removal "works", although it does nothing.
                return Ok(());
            }
            remove_archive(ctx, vault, key).await
        }
        HookAction::Checkpresent => {
            if empty {
                // The empty key is always present.
                println!("{key}");
                return Ok(());
            }
            let outcome = check_present(
                ctx,
                &PresenceRequest {
                    vault,
                    raw: key,
                    max_age_hours: Some(ctx.config.sync.checkpresent_max_age_hours),
                    wait: false,
                },
            )
            .await?;
            match outcome {
                PresenceOutcome::Present { reference } => {
                    println!("{reference}");
                    Ok(())
                }
                PresenceOutcome::Retryable(message) => Err(AppError::Retryable(message)),
                // Determinate absence: silence, success exit. The caller
                // reads the missing key token as "not present".
                PresenceOutcome::NotFound { .. } | PresenceOutcome::NotConfirmedRecently => Ok(()),
            }
        }
    }
}

/// Delete an archive remotely and tombstone it locally. Idempotent: a key
/// that is already gone counts as removed.
async fn remove_archive(ctx: &AppContext, vault: &str, key: &str) -> AppResult<()> {
    let reference = Reference::parse(key);
    let archive_id = match ctx.cache.archive_id(vault, &reference).await {
        Ok(id) => id,
        Err(icebox_cache::CacheError::NotFound(_)) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    ctx.tracker
        .store()
        .delete_archive(vault, &archive_id)
        .await
        .map_err(|e| AppError::Failure(anyhow::Error::new(e).context("archive delete failed")))?;
    ctx.cache
        .mark_deleted(vault, &reference, ctx.now())
        .await?;
    Ok(())
}

fn required_file<'a>(file: Option<&'a Path>, action: &str) -> AppResult<&'a str> {
    file.and_then(Path::to_str)
        .ok_or_else(|| AppError::Failure(anyhow!("hook action '{action}' requires a file path")))
}
