//! Inventory payload encoding and decoding.
//!
//! An inventory job's output is a JSON document listing a vault's archives
//! as of the inventory generation date. Timestamps on the wire are RFC 3339
//! strings; everything internal is unix seconds.

use crate::error::{RemoteError, RemoteResult};
use icebox_core::{InventoryEntry, InventorySnapshot};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Wire form of an inventory job's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDoc {
    pub vault: String,
    /// RFC 3339 generation time of the inventory.
    pub inventory_date: String,
    pub archives: Vec<InventoryArchiveDoc>,
}

/// Wire form of one archive on an inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryArchiveDoc {
    pub archive_id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// RFC 3339 upstream creation time.
    pub creation_date: String,
}

/// Parse an RFC 3339 timestamp into unix seconds.
pub fn parse_timestamp(raw: &str) -> RemoteResult<i64> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map(|t| t.unix_timestamp())
        .map_err(|e| RemoteError::Protocol(format!("invalid timestamp '{raw}': {e}")))
}

/// Format unix seconds as an RFC 3339 timestamp.
pub fn format_timestamp(unix: i64) -> RemoteResult<String> {
    let time = OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| RemoteError::Protocol(format!("timestamp {unix} out of range: {e}")))?;
    time.format(&Rfc3339)
        .map_err(|e| RemoteError::Protocol(format!("failed to format timestamp {unix}: {e}")))
}

/// Decode an inventory job output into a snapshot.
///
/// `job_creation_date` is when the retrieval job was submitted; the
/// reconciler needs it for lag compensation.
pub fn parse_inventory(payload: &[u8], job_creation_date: i64) -> RemoteResult<InventorySnapshot> {
    let doc: InventoryDoc = serde_json::from_slice(payload)?;
    let inventory_date = parse_timestamp(&doc.inventory_date)?;
    let mut entries = Vec::with_capacity(doc.archives.len());
    for archive in doc.archives {
        entries.push(InventoryEntry {
            creation_date: parse_timestamp(&archive.creation_date)?,
            archive_id: archive.archive_id,
            description: archive.description,
        });
    }
    Ok(InventorySnapshot {
        vault: doc.vault,
        inventory_date,
        job_creation_date,
        entries,
    })
}
