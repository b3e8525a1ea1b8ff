//! Remote vault transport and asynchronous job tracking.
//!
//! The remote service is asynchronous and eventually consistent: archive
//! creation and deletion return immediately but are not reflected in
//! listings, and the only catalog view is an inventory fetched through a
//! job that completes hours later. This crate provides:
//! - The [`VaultStore`] transport trait and its backends
//! - The job model and [`JobTracker`] (find, filter, bounded wait)
//! - Inventory payload encoding and decoding

pub mod backends;
pub mod error;
pub mod inventory;
pub mod jobs;
pub mod traits;

pub use error::{RemoteError, RemoteResult};
pub use jobs::{Job, JobKind, JobStatus, JobTracker, RetryPolicy};
pub use traits::{ByteStream, VaultStore, bytes_stream, read_to_end};

use icebox_core::RemoteConfig;
use std::sync::Arc;

/// Create a vault store from configuration.
pub async fn from_config(config: &RemoteConfig) -> RemoteResult<Arc<dyn VaultStore>> {
    match config {
        RemoteConfig::Filesystem {
            root,
            job_delay_secs,
            account,
        } => {
            let backend =
                backends::filesystem::FilesystemBackend::new(root, *job_delay_secs, account.clone())
                    .await?;
            Ok(Arc::new(backend) as Arc<dyn VaultStore>)
        }
        RemoteConfig::Http {
            endpoint,
            token,
            account,
        } => {
            let backend =
                backends::http::HttpBackend::new(endpoint, token.as_deref(), account.clone())?;
            Ok(Arc::new(backend) as Arc<dyn VaultStore>)
        }
    }
}
