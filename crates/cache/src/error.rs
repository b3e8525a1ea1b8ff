//! Record store error types.

use thiserror::Error;

/// Archive record store operation errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("archive not found: {0}")]
    NotFound(String),

    #[error(
        "reference '{reference}' is ambiguous: {count} live archives share that name; \
         use an id: reference"
    )]
    Ambiguous { reference: String, count: usize },

    #[error("archive id already cached: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for record store operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
