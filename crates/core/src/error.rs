//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("archive description is empty after trimming leading whitespace")]
    EmptyDescription,

    #[error("archive description is {len} bytes (limit {limit})")]
    DescriptionTooLong { len: usize, limit: usize },

    #[error(
        "archive description contains byte 0x{byte:02x}; only printable 7-bit ASCII is allowed"
    )]
    DescriptionNotPrintable { byte: u8 },
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
