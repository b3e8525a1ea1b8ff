//! Local filesystem vault store.
//!
//! Simulates the remote's asynchronous job protocol on a directory tree,
//! for development and testing. Archives live as payload files with a JSON
//! metadata sidecar; jobs are JSON documents. A job's state is derived from
//! elapsed time — it succeeds once `job_delay_secs` have passed since
//! submission — so concurrent invocations see a consistent view without any
//! coordination. Inventory payloads are generated at submission time, which
//! mimics the upstream's stale-snapshot behavior: the inventory reflects
//! the catalog at generation, not at fetch.

use crate::error::{RemoteError, RemoteResult};
use crate::inventory::{self, InventoryArchiveDoc, InventoryDoc};
use crate::jobs::{Job, JobKind, JobStatus};
use crate::traits::{ByteStream, VaultStore};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

/// Chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// On-disk job document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobDoc {
    job_id: String,
    action: String,
    #[serde(default)]
    archive_id: Option<String>,
    /// RFC 3339 submission time.
    creation_date: String,
    #[serde(default)]
    archive_size: Option<u64>,
    /// Inventory payload captured at submission, for inventory jobs.
    #[serde(default)]
    inventory: Option<InventoryDoc>,
}

/// Archive metadata sidecar.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveMeta {
    archive_id: String,
    description: Option<String>,
    /// RFC 3339 creation time.
    creation_date: String,
}

/// Filesystem-backed vault store with simulated asynchronous jobs.
pub struct FilesystemBackend {
    root: PathBuf,
    job_delay_secs: u64,
    account: Option<String>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(
        root: impl AsRef<Path>,
        job_delay_secs: u64,
        account: Option<String>,
    ) -> RemoteResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("vaults")).await?;
        Ok(Self {
            root,
            job_delay_secs,
            account,
        })
    }

    fn now(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Validate a single path component (vault name, archive id, job id).
    fn checked_component(kind: &str, value: &str) -> RemoteResult<()> {
        if value.is_empty()
            || value == "."
            || value == ".."
            || value.contains('/')
            || value.contains('\\')
        {
            return Err(RemoteError::InvalidInput(format!(
                "unsafe {kind}: '{value}'"
            )));
        }
        Ok(())
    }

    fn vault_dir(&self, vault: &str) -> RemoteResult<PathBuf> {
        Self::checked_component("vault name", vault)?;
        Ok(self.root.join("vaults").join(vault))
    }

    async fn existing_vault_dir(&self, vault: &str) -> RemoteResult<PathBuf> {
        let dir = self.vault_dir(vault)?;
        if !fs::try_exists(&dir).await? {
            return Err(RemoteError::NotFound(format!("vault '{vault}'")));
        }
        Ok(dir)
    }

    async fn load_meta(&self, vault: &str, archive_id: &str) -> RemoteResult<ArchiveMeta> {
        let dir = self.existing_vault_dir(vault).await?;
        Self::checked_component("archive id", archive_id)?;
        let path = dir.join("archives").join(format!("{archive_id}.meta.json"));
        let raw = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(format!("archive '{archive_id}'"))
            } else {
                RemoteError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn load_job_doc(&self, vault: &str, job_id: &str) -> RemoteResult<JobDoc> {
        let dir = self.existing_vault_dir(vault).await?;
        Self::checked_component("job id", job_id)?;
        let path = dir.join("jobs").join(format!("{job_id}.json"));
        let raw = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(format!("job '{job_id}'"))
            } else {
                RemoteError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Derive the observable job state from the submission time.
    fn job_from_doc(&self, vault: &str, doc: JobDoc) -> RemoteResult<Job> {
        let creation_date = inventory::parse_timestamp(&doc.creation_date)?;
        let completes_at = creation_date + self.job_delay_secs as i64;
        let completed = self.now() >= completes_at;

        let kind = match doc.action.as_str() {
            "inventory" => JobKind::Inventory,
            "retrieval" => JobKind::Retrieval {
                archive_id: doc.archive_id.clone().ok_or_else(|| {
                    RemoteError::Protocol("retrieval job without archive_id".to_string())
                })?,
            },
            other => {
                return Err(RemoteError::Protocol(format!("unknown job action '{other}'")));
            }
        };

        Ok(Job {
            id: doc.job_id,
            vault: vault.to_string(),
            kind,
            status: if completed {
                JobStatus::Succeeded
            } else {
                JobStatus::InProgress
            },
            creation_date,
            completion_date: completed.then_some(completes_at),
            archive_size: doc.archive_size,
        })
    }

    async fn write_json_atomic<T: Serialize>(&self, path: &Path, value: &T) -> RemoteResult<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &data).await
    }

    /// Write via a temp file in the same directory, then rename into place.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> RemoteResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| RemoteError::InvalidInput(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Scan a vault's archives into an inventory document dated now.
    async fn generate_inventory(&self, vault: &str) -> RemoteResult<InventoryDoc> {
        let dir = self.existing_vault_dir(vault).await?;
        let archives_dir = dir.join("archives");
        let mut archives = Vec::new();

        if fs::try_exists(&archives_dir).await? {
            let mut entries = fs::read_dir(&archives_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(archive_id) = name.strip_suffix(".meta.json") else {
                    continue;
                };
                let meta = self.load_meta(vault, archive_id).await?;
                archives.push(InventoryArchiveDoc {
                    archive_id: meta.archive_id,
                    description: meta.description,
                    creation_date: meta.creation_date,
                });
            }
        }
        archives.sort_by(|a, b| a.archive_id.cmp(&b.archive_id));

        Ok(InventoryDoc {
            vault: vault.to_string(),
            inventory_date: inventory::format_timestamp(self.now())?,
            archives,
        })
    }

    async fn submit_job(&self, vault: &str, doc: JobDoc) -> RemoteResult<Job> {
        let dir = self.existing_vault_dir(vault).await?;
        let path = dir.join("jobs").join(format!("{}.json", doc.job_id));
        self.write_json_atomic(&path, &doc).await?;
        let job = self.job_from_doc(vault, doc)?;
        tracing::debug!(vault, job_id = %job.id, "queued job");
        Ok(job)
    }

    /// Stream `len` bytes of a file starting at `start`.
    async fn stream_file_range(
        path: PathBuf,
        start: u64,
        len: u64,
    ) -> RemoteResult<ByteStream> {
        let mut file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(path.display().to_string())
            } else {
                RemoteError::Io(e)
            }
        })?;
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let stream = async_stream::try_stream! {
            let mut remaining = len;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            while remaining > 0 {
                let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    break;
                }
                remaining -= n as u64;
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };
        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl VaultStore for FilesystemBackend {
    fn account_key(&self) -> String {
        self.account
            .clone()
            .unwrap_or_else(|| self.root.display().to_string())
    }

    async fn create_vault(&self, vault: &str) -> RemoteResult<()> {
        let dir = self.vault_dir(vault)?;
        fs::create_dir_all(dir.join("archives")).await?;
        fs::create_dir_all(dir.join("jobs")).await?;
        Ok(())
    }

    async fn list_vaults(&self) -> RemoteResult<Vec<String>> {
        let mut vaults = Vec::new();
        let mut entries = fs::read_dir(self.root.join("vaults")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                vaults.push(name.to_string());
            }
        }
        vaults.sort();
        Ok(vaults)
    }

    async fn create_archive(
        &self,
        vault: &str,
        description: &str,
        mut payload: ByteStream,
    ) -> RemoteResult<String> {
        use futures::StreamExt;

        let description = icebox_core::validate_description(description)
            .map_err(|e| RemoteError::InvalidInput(e.to_string()))?;
        let dir = self.existing_vault_dir(vault).await?;
        let archive_id = Uuid::new_v4().to_string();
        let archives_dir = dir.join("archives");
        fs::create_dir_all(&archives_dir).await?;

        let tmp = archives_dir.join(format!(".tmp-{archive_id}"));
        let mut file = fs::File::create(&tmp).await?;
        while let Some(chunk) = payload.next().await {
            file.write_all(&chunk?).await?;
        }
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, archives_dir.join(&archive_id)).await?;

        let meta = ArchiveMeta {
            archive_id: archive_id.clone(),
            description: Some(description.to_string()),
            creation_date: inventory::format_timestamp(self.now())?,
        };
        self.write_json_atomic(
            &archives_dir.join(format!("{archive_id}.meta.json")),
            &meta,
        )
        .await?;

        tracing::debug!(vault, archive_id = %archive_id, "stored archive");
        Ok(archive_id)
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> RemoteResult<()> {
        let dir = self.existing_vault_dir(vault).await?;
        Self::checked_component("archive id", archive_id)?;
        let payload = dir.join("archives").join(archive_id);
        fs::remove_file(&payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(format!("archive '{archive_id}'"))
            } else {
                RemoteError::Io(e)
            }
        })?;
        let meta = dir.join("archives").join(format!("{archive_id}.meta.json"));
        if let Err(e) = fs::remove_file(&meta).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(RemoteError::Io(e));
        }
        Ok(())
    }

    async fn submit_inventory_job(&self, vault: &str) -> RemoteResult<Job> {
        let doc = JobDoc {
            job_id: Uuid::new_v4().to_string(),
            action: "inventory".to_string(),
            archive_id: None,
            creation_date: inventory::format_timestamp(self.now())?,
            archive_size: None,
            inventory: Some(self.generate_inventory(vault).await?),
        };
        self.submit_job(vault, doc).await
    }

    async fn submit_retrieval_job(&self, vault: &str, archive_id: &str) -> RemoteResult<Job> {
        let dir = self.existing_vault_dir(vault).await?;
        Self::checked_component("archive id", archive_id)?;
        let payload = dir.join("archives").join(archive_id);
        let meta = fs::metadata(&payload).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RemoteError::NotFound(format!("archive '{archive_id}'"))
            } else {
                RemoteError::Io(e)
            }
        })?;

        let doc = JobDoc {
            job_id: Uuid::new_v4().to_string(),
            action: "retrieval".to_string(),
            archive_id: Some(archive_id.to_string()),
            creation_date: inventory::format_timestamp(self.now())?,
            archive_size: Some(meta.len()),
            inventory: None,
        };
        self.submit_job(vault, doc).await
    }

    async fn list_jobs(&self, vault: &str) -> RemoteResult<Vec<Job>> {
        let dir = self.existing_vault_dir(vault).await?;
        let jobs_dir = dir.join("jobs");
        let mut jobs = Vec::new();

        if fs::try_exists(&jobs_dir).await? {
            let mut entries = fs::read_dir(&jobs_dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(job_id) = name.strip_suffix(".json") else {
                    continue;
                };
                let doc = self.load_job_doc(vault, job_id).await?;
                jobs.push(self.job_from_doc(vault, doc)?);
            }
        }
        jobs.sort_by(|a, b| a.creation_date.cmp(&b.creation_date));
        Ok(jobs)
    }

    async fn get_job(&self, vault: &str, job_id: &str) -> RemoteResult<Job> {
        let doc = self.load_job_doc(vault, job_id).await?;
        self.job_from_doc(vault, doc)
    }

    async fn fetch_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<(u64, u64)>,
    ) -> RemoteResult<ByteStream> {
        let doc = self.load_job_doc(vault, job_id).await?;
        let job = self.job_from_doc(vault, doc.clone())?;
        if !job.succeeded() {
            return Err(RemoteError::InvalidInput(format!(
                "job '{job_id}' has not completed"
            )));
        }

        if let Some((start, end)) = range
            && end < start
        {
            return Err(RemoteError::InvalidInput(format!(
                "invalid byte range {start}-{end}"
            )));
        }

        match doc.inventory {
            Some(inventory_doc) => {
                let data = serde_json::to_vec(&inventory_doc)?;
                let data = match range {
                    Some((start, end)) => {
                        let start = (start as usize).min(data.len());
                        let end = (end.saturating_add(1) as usize).min(data.len());
                        Bytes::copy_from_slice(&data[start..end])
                    }
                    None => Bytes::from(data),
                };
                Ok(crate::traits::bytes_stream(data))
            }
            None => {
                let archive_id = doc.archive_id.ok_or_else(|| {
                    RemoteError::Protocol("retrieval job without archive_id".to_string())
                })?;
                let dir = self.existing_vault_dir(vault).await?;
                let path = dir.join("archives").join(&archive_id);
                let (start, len) = match range {
                    Some((start, end)) => (start, end.saturating_sub(start).saturating_add(1)),
                    None => (0, u64::MAX),
                };
                Self::stream_file_range(path, start, len).await
            }
        }
    }
}
