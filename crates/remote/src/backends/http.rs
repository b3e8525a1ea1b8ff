//! HTTP vault store backend.
//!
//! Talks to a vault service exposing the job-based archival protocol over
//! REST. Transport failures and non-2xx statuses (other than 404) surface
//! as the transient `Upstream` kind; 404 maps to `NotFound`.

use crate::error::{RemoteError, RemoteResult};
use crate::inventory;
use crate::jobs::{Job, JobKind, JobStatus};
use crate::traits::{ByteStream, VaultStore};
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// HTTP header carrying the archive description on upload.
const DESCRIPTION_HEADER: &str = "x-icebox-description";

/// HTTP-backed vault store.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    account: Option<String>,
}

impl HttpBackend {
    /// Create a client for the service at `endpoint`.
    pub fn new(endpoint: &str, token: Option<&str>, account: Option<String>) -> RemoteResult<Self> {
        let base_url = Url::parse(endpoint)
            .map_err(|e| RemoteError::InvalidInput(format!("invalid endpoint URL: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.map(str::to_string),
            account,
        })
    }

    fn url(&self, path: &str) -> RemoteResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::InvalidInput(format!("failed to build URL: {e}")))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::NotFound(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Upstream(format!("{status}: {body}")));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> RemoteResult<T> {
        let response = Self::check_status(self.authed(req).send().await?).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> RemoteResult<()> {
        Self::check_status(self.authed(req).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl VaultStore for HttpBackend {
    fn account_key(&self) -> String {
        self.account
            .clone()
            .unwrap_or_else(|| self.base_url.as_str().trim_end_matches('/').to_string())
    }

    async fn create_vault(&self, vault: &str) -> RemoteResult<()> {
        let url = self.url(&format!("/v1/vaults/{vault}"))?;
        self.send_empty(self.http.put(url)).await
    }

    async fn list_vaults(&self) -> RemoteResult<Vec<String>> {
        let url = self.url("/v1/vaults")?;
        let response: ListVaultsResponse = self.send_json(self.http.get(url)).await?;
        Ok(response.vaults)
    }

    async fn create_archive(
        &self,
        vault: &str,
        description: &str,
        payload: ByteStream,
    ) -> RemoteResult<String> {
        let description = icebox_core::validate_description(description)
            .map_err(|e| RemoteError::InvalidInput(e.to_string()))?;
        let url = self.url(&format!("/v1/vaults/{vault}/archives"))?;
        let response: CreateArchiveResponse = self
            .send_json(
                self.http
                    .post(url)
                    .header(DESCRIPTION_HEADER, description)
                    .body(reqwest::Body::wrap_stream(payload)),
            )
            .await?;
        Ok(response.archive_id)
    }

    async fn delete_archive(&self, vault: &str, archive_id: &str) -> RemoteResult<()> {
        let url = self.url(&format!("/v1/vaults/{vault}/archives/{archive_id}"))?;
        self.send_empty(self.http.delete(url)).await
    }

    async fn submit_inventory_job(&self, vault: &str) -> RemoteResult<Job> {
        let url = self.url(&format!("/v1/vaults/{vault}/jobs"))?;
        let request = SubmitJobRequest {
            action: "inventory".to_string(),
            archive_id: None,
        };
        let response: JobResponse = self.send_json(self.http.post(url).json(&request)).await?;
        response.into_job(vault)
    }

    async fn submit_retrieval_job(&self, vault: &str, archive_id: &str) -> RemoteResult<Job> {
        let url = self.url(&format!("/v1/vaults/{vault}/jobs"))?;
        let request = SubmitJobRequest {
            action: "retrieval".to_string(),
            archive_id: Some(archive_id.to_string()),
        };
        let response: JobResponse = self.send_json(self.http.post(url).json(&request)).await?;
        response.into_job(vault)
    }

    async fn list_jobs(&self, vault: &str) -> RemoteResult<Vec<Job>> {
        let url = self.url(&format!("/v1/vaults/{vault}/jobs"))?;
        let response: ListJobsResponse = self.send_json(self.http.get(url)).await?;
        response
            .jobs
            .into_iter()
            .map(|job| job.into_job(vault))
            .collect()
    }

    async fn get_job(&self, vault: &str, job_id: &str) -> RemoteResult<Job> {
        let url = self.url(&format!("/v1/vaults/{vault}/jobs/{job_id}"))?;
        let response: JobResponse = self.send_json(self.http.get(url)).await?;
        response.into_job(vault)
    }

    async fn fetch_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<(u64, u64)>,
    ) -> RemoteResult<ByteStream> {
        let url = self.url(&format!("/v1/vaults/{vault}/jobs/{job_id}/output"))?;
        let mut req = self.http.get(url);
        if let Some((start, end)) = range {
            req = req.header(reqwest::header::RANGE, format!("bytes={start}-{end}"));
        }
        let response = Self::check_status(self.authed(req).send().await?).await?;
        let stream = response
            .bytes_stream()
            .map_err(|e| RemoteError::Upstream(e.to_string()));
        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Request/response types (mirrored from the service API)
// =============================================================================

#[derive(Debug, Serialize)]
struct SubmitJobRequest {
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    job_id: String,
    action: String,
    #[serde(default)]
    archive_id: Option<String>,
    status_code: String,
    creation_date: String,
    #[serde(default)]
    completion_date: Option<String>,
    #[serde(default)]
    archive_size: Option<u64>,
}

impl JobResponse {
    fn into_job(self, vault: &str) -> RemoteResult<Job> {
        let kind = match self.action.as_str() {
            "inventory" => JobKind::Inventory,
            "retrieval" => JobKind::Retrieval {
                archive_id: self.archive_id.ok_or_else(|| {
                    RemoteError::Protocol("retrieval job without archive_id".to_string())
                })?,
            },
            other => {
                return Err(RemoteError::Protocol(format!("unknown job action '{other}'")));
            }
        };
        let status = match self.status_code.as_str() {
            "InProgress" => JobStatus::InProgress,
            "Succeeded" => JobStatus::Succeeded,
            "Failed" => JobStatus::Failed,
            other => {
                return Err(RemoteError::Protocol(format!("unknown job status '{other}'")));
            }
        };
        Ok(Job {
            id: self.job_id,
            vault: vault.to_string(),
            kind,
            status,
            creation_date: inventory::parse_timestamp(&self.creation_date)?,
            completion_date: self
                .completion_date
                .as_deref()
                .map(inventory::parse_timestamp)
                .transpose()?,
            archive_size: self.archive_size,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListJobsResponse {
    jobs: Vec<JobResponse>,
}

#[derive(Debug, Deserialize)]
struct ListVaultsResponse {
    vaults: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateArchiveResponse {
    archive_id: String,
}
