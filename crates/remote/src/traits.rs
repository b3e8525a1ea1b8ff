//! Vault store trait definition.

use crate::error::RemoteResult;
use crate::jobs::Job;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A boxed stream of bytes for streaming payloads.
pub type ByteStream = Pin<Box<dyn Stream<Item = RemoteResult<Bytes>> + Send>>;

/// Remote vault store abstraction.
///
/// Archives are immutable, opaque-identified blobs; deletion is the only
/// supported mutation. Neither creation nor deletion is reflected
/// synchronously in the remote catalog — the catalog is only observable
/// through inventory retrieval jobs.
#[async_trait]
pub trait VaultStore: Send + Sync + 'static {
    /// Key identifying the remote namespace this store addresses. Used to
    /// scope the local cache; connections addressing the same namespace
    /// must return the same key.
    fn account_key(&self) -> String;

    /// Create a vault.
    async fn create_vault(&self, vault: &str) -> RemoteResult<()>;

    /// List vault names.
    async fn list_vaults(&self) -> RemoteResult<Vec<String>>;

    /// Store an archive and return its remote-assigned identifier. The
    /// description must already satisfy the service's description rules.
    async fn create_archive(
        &self,
        vault: &str,
        description: &str,
        payload: ByteStream,
    ) -> RemoteResult<String>;

    /// Delete an archive. Returns success once the delete is accepted; the
    /// archive may keep appearing on inventories generated before the
    /// delete propagates.
    async fn delete_archive(&self, vault: &str, archive_id: &str) -> RemoteResult<()>;

    /// Queue an inventory retrieval job.
    async fn submit_inventory_job(&self, vault: &str) -> RemoteResult<Job>;

    /// Queue an archive retrieval job.
    async fn submit_retrieval_job(&self, vault: &str, archive_id: &str) -> RemoteResult<Job>;

    /// All jobs currently known for a vault, any kind, any status.
    async fn list_jobs(&self, vault: &str) -> RemoteResult<Vec<Job>>;

    /// Refresh a single job's status.
    async fn get_job(&self, vault: &str, job_id: &str) -> RemoteResult<Job>;

    /// Fetch the output of a succeeded job, optionally restricted to an
    /// inclusive byte range.
    async fn fetch_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<(u64, u64)>,
    ) -> RemoteResult<ByteStream>;
}

/// Wrap an in-memory buffer as a `ByteStream`.
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Collect a `ByteStream` into memory.
pub async fn read_to_end(mut stream: ByteStream) -> RemoteResult<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}
