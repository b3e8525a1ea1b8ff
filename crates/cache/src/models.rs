//! Row types for the archive record store.

use icebox_core::reference;
use sqlx::FromRow;

/// One archive ever known to the cache, scoped by account key and vault.
///
/// All timestamps are unix seconds. A row with `deleted_local` set is a
/// tombstone: excluded from live listings and resolution, but retained until
/// an inventory dated after the tombstone confirms the archive has left the
/// upstream catalog.
#[derive(Debug, Clone, FromRow)]
pub struct ArchiveRow {
    pub account: String,
    pub vault: String,
    /// Remote-assigned identifier; immutable, primary identity.
    pub archive_id: String,
    /// Human-assigned name; absent for archives discovered upstream-first
    /// with no description. Mutated only by reconciliation.
    pub name: Option<String>,
    /// When this agent created the archive; null for upstream-first rows.
    pub created_local: Option<i64>,
    /// When this agent issued a delete; null until then.
    pub deleted_local: Option<i64>,
    /// Latest point at which an inventory confirmed the archive existed.
    /// Monotonically non-decreasing under reconciliation.
    pub last_seen_upstream: Option<i64>,
}

impl ArchiveRow {
    /// Whether a local delete is awaiting upstream confirmation.
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_local.is_some()
    }

    /// Last time the archive was known to exist: the upstream confirmation
    /// if any, else the local creation time (a freshly-uploaded archive is
    /// optimistically treated as seen at creation).
    pub fn last_seen(&self) -> Option<i64> {
        self.last_seen_upstream.or(self.created_local)
    }

    /// Display reference for this row when its name is unique.
    pub fn live_ref(&self) -> String {
        reference::live_ref(self.name.as_deref(), &self.archive_id)
    }

    /// Id-qualified listing form (`id:<id>\t<name>`).
    pub fn id_qualified_ref(&self) -> String {
        reference::id_qualified_ref(self.name.as_deref(), &self.archive_id)
    }
}
