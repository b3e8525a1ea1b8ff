//! Archive upload.

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use anyhow::{Context, anyhow};
use bytes::Bytes;
use icebox_remote::ByteStream;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Stdin sentinel on the command line.
pub const STDIN_FILE: &str = "-";

/// Name recorded for archives streamed from stdin.
const STDIN_NAME: &str = "<stdin>";

/// Upload one archive and record it in the cache.
///
/// The name defaults to the source file's basename (or `<stdin>`); it
/// doubles as the remote-side description and must satisfy the service's
/// description rules.
pub async fn archive_upload(
    ctx: &AppContext,
    vault: &str,
    file: &str,
    name: Option<&str>,
) -> AppResult<String> {
    let name = match name {
        Some(name) => name.to_string(),
        None if file == STDIN_FILE => STDIN_NAME.to_string(),
        None => Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::Failure(anyhow!("archive name not specified; use --name"))
            })?,
    };
    let name = icebox_core::validate_description(&name)
        .map_err(|e| AppError::Failure(anyhow::Error::new(e)))?
        .to_string();

    let payload = if file == STDIN_FILE {
        stdin_stream()
    } else {
        file_stream(PathBuf::from(file))
    };

    let archive_id = ctx
        .tracker
        .store()
        .create_archive(vault, &name, payload)
        .await
        .map_err(|e| AppError::Failure(anyhow::Error::new(e).context("archive upload failed")))?;

    ctx.cache
        .add_archive(vault, Some(&name), &archive_id, ctx.now())
        .await
        .context("archive stored but could not be recorded in the cache")?;

    tracing::info!(vault, name, archive_id, "archive uploaded");
    Ok(archive_id)
}

fn file_stream(path: PathBuf) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut file = tokio::fs::File::open(&path).await?;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    })
}

fn stdin_stream() -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = stdin.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    })
}
