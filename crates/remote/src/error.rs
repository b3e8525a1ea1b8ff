//! Remote transport error types.

use thiserror::Error;

/// Remote vault store operation errors.
///
/// `Upstream` is the transient kind: a transport or polling failure that a
/// later invocation may not see. It is deliberately distinct from "nothing
/// matched" — an empty job listing is `Ok(vec![])`, never an error.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("timed out waiting for job completion after {waited_secs}s")]
    Timeout { waited_secs: u64 },

    #[error("malformed remote payload: {0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Protocol(err.to_string())
    }
}

/// Result type for remote operations.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;
