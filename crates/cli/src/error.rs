//! CLI outcome and exit-code mapping.

use icebox_cache::CacheError;
use icebox_remote::RemoteError;
use thiserror::Error;

/// Generic failure exit code.
pub const EXIT_FAILURE: i32 = 1;

/// From sysexits.h: "temp failure; user is invited to retry". Automation
/// drivers use this to distinguish "try again later" from "this is wrong".
pub const EXIT_TEMPFAIL: i32 = 75;

/// A command's failure modes.
///
/// `Retryable` means an asynchronous job is queued or in flight and no
/// answer is available yet; everything else is a hard failure for this
/// invocation.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Retryable(String),

    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Retryable(_) => EXIT_TEMPFAIL,
            AppError::Failure(_) => EXIT_FAILURE,
        }
    }

    /// The transient-upstream cause of a failure, if that is what it is.
    pub fn transient_upstream(&self) -> Option<&RemoteError> {
        match self {
            AppError::Failure(err) => err
                .downcast_ref::<RemoteError>()
                .filter(|e| matches!(e, RemoteError::Upstream(_))),
            AppError::Retryable(_) => None,
        }
    }
}

impl From<RemoteError> for AppError {
    fn from(err: RemoteError) -> Self {
        AppError::Failure(anyhow::Error::new(err))
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::Failure(anyhow::Error::new(err))
    }
}

/// Result type for CLI operations.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_maps_to_tempfail() {
        assert_eq!(
            AppError::Retryable("queued".to_string()).exit_code(),
            EXIT_TEMPFAIL
        );
        assert_eq!(
            AppError::Failure(anyhow::anyhow!("boom")).exit_code(),
            EXIT_FAILURE
        );
    }

    #[test]
    fn transient_upstream_is_detected_through_context() {
        let err: AppError = RemoteError::Upstream("503".to_string()).into();
        assert!(err.transient_upstream().is_some());

        let err: AppError = RemoteError::Timeout { waited_secs: 60 }.into();
        assert!(err.transient_upstream().is_none());
    }
}
