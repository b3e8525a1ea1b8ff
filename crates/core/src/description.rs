//! Archive description validation.
//!
//! The remote service stores the archive name in the archive description
//! field, which it constrains: leading whitespace is stripped, the result
//! must be non-empty, at most 1024 bytes, and restricted to printable 7-bit
//! ASCII (0x20-0x7E). Validation happens at upload time; the reconciler
//! never assumes a richer character set for names coming back on
//! inventories.

use crate::error::{Error, Result};

/// Maximum archive description length in bytes.
pub const MAX_DESCRIPTION_BYTES: usize = 1024;

/// Validate an archive description, returning the form actually sent to the
/// remote (leading whitespace removed).
pub fn validate_description(raw: &str) -> Result<&str> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Err(Error::EmptyDescription);
    }
    if trimmed.len() > MAX_DESCRIPTION_BYTES {
        return Err(Error::DescriptionTooLong {
            len: trimmed.len(),
            limit: MAX_DESCRIPTION_BYTES,
        });
    }
    if let Some(byte) = trimmed.bytes().find(|b| !(0x20..=0x7e).contains(b)) {
        return Err(Error::DescriptionNotPrintable { byte });
    }
    Ok(trimmed)
}
