//! Shared test harness: a temp-dir filesystem remote plus an
//! account-scoped cache, wired the same way the binary wires them.

#![allow(dead_code)]

use bytes::Bytes;
use icebox_cli::context::AppContext;
use icebox_core::{AppConfig, RemoteConfig};
use icebox_remote::bytes_stream;
use tempfile::TempDir;

pub const VAULT: &str = "v";

pub struct TestEnv {
    /// Holds the remote root and cache database alive.
    pub dir: TempDir,
    pub ctx: AppContext,
}

/// Build a context over a fresh filesystem remote whose jobs complete after
/// `job_delay_secs`, with the vault already created.
pub async fn test_env(job_delay_secs: u64) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let mut config = AppConfig::for_testing(&dir.path().join("remote"), &dir.path().join("cache.db"));
    if let RemoteConfig::Filesystem {
        job_delay_secs: delay,
        ..
    } = &mut config.remote
    {
        *delay = job_delay_secs;
    }

    let ctx = AppContext::build(config).await.unwrap();
    ctx.tracker.store().create_vault(VAULT).await.unwrap();
    TestEnv { dir, ctx }
}

/// Store an archive remotely and record it locally, as an upload would.
pub async fn upload(ctx: &AppContext, name: &str, data: &'static [u8]) -> String {
    let archive_id = ctx
        .tracker
        .store()
        .create_archive(VAULT, name, bytes_stream(Bytes::from_static(data)))
        .await
        .unwrap();
    ctx.cache
        .add_archive(VAULT, Some(name), &archive_id, ctx.now())
        .await
        .unwrap();
    archive_id
}
