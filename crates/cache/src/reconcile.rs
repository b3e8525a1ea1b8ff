//! Inventory reconciliation.
//!
//! Merges one completed inventory snapshot into the record store: confirms
//! archives the inventory lists, fills in or flags names, and classifies
//! archives the inventory omits as confirmed-deleted, disappeared, or
//! simply too young to have propagated. The whole merge is a single
//! transaction; readers never observe a half-applied batch.

use crate::error::CacheResult;
use crate::models::ArchiveRow;
use crate::store::SqliteCache;
use icebox_core::{DEFAULT_INVENTORY_LAG_SECS, InventorySnapshot};
use std::collections::HashSet;
use std::fmt;

/// Caller-selectable reconciliation behavior.
#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    /// When set, repair divergence instead of only warning about it:
    /// upstream renames overwrite the local name and disappeared archives
    /// are purged from the cache.
    pub fix: bool,
    /// Upper bound in seconds on inventory regeneration staleness.
    pub inventory_lag_secs: i64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            fix: false,
            inventory_lag_secs: DEFAULT_INVENTORY_LAG_SECS,
        }
    }
}

/// The point in time an inventory proves its archives existed.
///
/// An inventory's generation date can lag arbitrarily far behind the
/// present when a vault doesn't change, but the remote guarantees the
/// regeneration is no staler than the lag bound relative to the retrieval
/// job request. Taking the later of the two avoids understating freshness
/// while never overstating it past the job request time. The job request
/// time (rather than completion time) is the anchor because an archive
/// deleted while an inventory job runs can still appear in that inventory.
pub fn effective_seen_date(inventory_date: i64, job_creation_date: i64, lag_secs: i64) -> i64 {
    inventory_date.max(job_creation_date - lag_secs)
}

/// A non-fatal divergence noticed during reconciliation.
///
/// Anomalies never abort the batch; they are returned to the caller and
/// logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// The upstream description differs from the cached name.
    Renamed {
        archive_id: String,
        old: String,
        new: String,
        fixed: bool,
    },
    /// Tombstoned locally, yet an inventory dated after the tombstone still
    /// lists it.
    StillPresentAfterDelete { reference: String },
    /// Tombstoned locally and listed by an inventory predating the
    /// tombstone; expected until the delete propagates.
    DeleteNotYetPropagated { reference: String },
    /// A previously-confirmed (or long-since-created) archive has left the
    /// inventory without a local delete.
    Disappeared { reference: String, purged: bool },
    /// Created locally too recently to expect inventory presence yet.
    NotYetInInventory { reference: String },
    /// A local delete has been confirmed upstream; the record was purged.
    DeleteConfirmed { reference: String },
}

impl Anomaly {
    /// Expected-course-of-events notices, logged at info rather than warn.
    pub fn is_informational(&self) -> bool {
        matches!(self, Anomaly::DeleteConfirmed { .. })
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::Renamed {
                archive_id,
                old,
                new,
                fixed,
            } => {
                write!(
                    f,
                    "archive '{archive_id}' appears to have changed name from '{old}' to '{new}'"
                )?;
                if *fixed {
                    write!(f, " (fixed)")?;
                }
                Ok(())
            }
            Anomaly::StillPresentAfterDelete { reference } => {
                write!(f, "archive '{reference}' marked deleted but still present")
            }
            Anomaly::DeleteNotYetPropagated { reference } => {
                write!(f, "archive '{reference}' deletion not yet in inventory")
            }
            Anomaly::Disappeared { reference, purged } => {
                write!(f, "archive disappeared: '{reference}'")?;
                if *purged {
                    write!(f, " (removed from cache)")?;
                }
                Ok(())
            }
            Anomaly::NotYetInInventory { reference } => {
                write!(f, "new archive not yet in inventory: '{reference}'")
            }
            Anomaly::DeleteConfirmed { reference } => {
                write!(
                    f,
                    "deleted archive '{reference}' has left inventory; removed from cache"
                )
            }
        }
    }
}

impl SqliteCache {
    /// Merge one inventory snapshot into the record store.
    ///
    /// Applies both passes — confirming listed archives and classifying
    /// missing ones — in a single transaction, and returns the anomalies
    /// noticed along the way.
    pub async fn apply_snapshot(
        &self,
        snapshot: &InventorySnapshot,
        policy: &ReconcilePolicy,
    ) -> CacheResult<Vec<Anomaly>> {
        let seen = effective_seen_date(
            snapshot.inventory_date,
            snapshot.job_creation_date,
            policy.inventory_lag_secs,
        );
        let vault = snapshot.vault.as_str();
        let account = self.account().to_string();

        let mut anomalies = Vec::new();
        let mut listed_ids: HashSet<&str> = HashSet::new();
        let mut tx = self.pool().begin().await?;

        for entry in &snapshot.entries {
            listed_ids.insert(entry.archive_id.as_str());

            let existing = sqlx::query_as::<_, ArchiveRow>(
                "SELECT * FROM archives WHERE account = ? AND vault = ? AND archive_id = ?",
            )
            .bind(&account)
            .bind(vault)
            .bind(&entry.archive_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(row) = existing else {
                // First sight of an archive created elsewhere (or before the
                // cache existed).
                sqlx::query(
                    "INSERT INTO archives (account, vault, archive_id, name, last_seen_upstream) \
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(&account)
                .bind(vault)
                .bind(&entry.archive_id)
                .bind(&entry.description)
                .bind(seen)
                .execute(&mut *tx)
                .await?;
                continue;
            };

            let mut name = row.name.clone();
            match (&row.name, &entry.description) {
                (None, Some(upstream)) => name = Some(upstream.clone()),
                (Some(local), Some(upstream)) if local != upstream => {
                    if policy.fix {
                        name = Some(upstream.clone());
                    }
                    anomalies.push(Anomaly::Renamed {
                        archive_id: row.archive_id.clone(),
                        old: local.clone(),
                        new: upstream.clone(),
                        fixed: policy.fix,
                    });
                }
                _ => {}
            }

            if let Some(deleted) = row.deleted_local {
                let reference = row.live_ref();
                if deleted < snapshot.inventory_date {
                    anomalies.push(Anomaly::StillPresentAfterDelete { reference });
                } else {
                    anomalies.push(Anomaly::DeleteNotYetPropagated { reference });
                }
            }

            // last_seen_upstream never moves backward.
            let advanced = row.last_seen_upstream.map_or(seen, |prev| prev.max(seen));
            sqlx::query(
                "UPDATE archives SET name = ?, last_seen_upstream = ? \
                 WHERE account = ? AND vault = ? AND archive_id = ?",
            )
            .bind(&name)
            .bind(advanced)
            .bind(&account)
            .bind(vault)
            .bind(&entry.archive_id)
            .execute(&mut *tx)
            .await?;
        }

        // Second pass: records the inventory did not list.
        let known = sqlx::query_as::<_, ArchiveRow>(
            "SELECT * FROM archives WHERE account = ? AND vault = ?",
        )
        .bind(&account)
        .bind(vault)
        .fetch_all(&mut *tx)
        .await?;

        for row in known {
            if listed_ids.contains(row.archive_id.as_str()) {
                continue;
            }
            let reference = row.live_ref();

            if let Some(deleted) = row.deleted_local
                && deleted < snapshot.inventory_date
            {
                // The inventory postdates the tombstone and omits the
                // archive: deletion confirmed, the record has served its
                // purpose.
                self.purge_in_tx(&mut tx, &account, vault, &row.archive_id)
                    .await?;
                anomalies.push(Anomaly::DeleteConfirmed { reference });
            } else if row.deleted_local.is_none()
                && (row.last_seen_upstream.is_some()
                    || row
                        .created_local
                        .is_some_and(|c| c < snapshot.inventory_date - policy.inventory_lag_secs))
            {
                // Previously confirmed, or old enough that the inventory
                // should have caught up with it by now.
                if policy.fix {
                    self.purge_in_tx(&mut tx, &account, vault, &row.archive_id)
                        .await?;
                }
                anomalies.push(Anomaly::Disappeared {
                    reference,
                    purged: policy.fix,
                });
            } else {
                anomalies.push(Anomaly::NotYetInInventory { reference });
            }
        }

        tx.commit().await?;

        for anomaly in &anomalies {
            if anomaly.is_informational() {
                tracing::info!(vault, "{anomaly}");
            } else {
                tracing::warn!(vault, "{anomaly}");
            }
        }
        Ok(anomalies)
    }

    async fn purge_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        account: &str,
        vault: &str,
        archive_id: &str,
    ) -> CacheResult<()> {
        sqlx::query("DELETE FROM archives WHERE account = ? AND vault = ? AND archive_id = ?")
            .bind(account)
            .bind(vault)
            .bind(archive_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icebox_core::{InventoryEntry, Reference};
    use tempfile::tempdir;

    const LAG: i64 = 100;

    fn policy(fix: bool) -> ReconcilePolicy {
        ReconcilePolicy {
            fix,
            inventory_lag_secs: LAG,
        }
    }

    fn snapshot(inventory_date: i64, job_creation_date: i64, entries: &[(&str, &str)]) -> InventorySnapshot {
        InventorySnapshot {
            vault: "v".to_string(),
            inventory_date,
            job_creation_date,
            entries: entries
                .iter()
                .map(|(id, name)| InventoryEntry {
                    archive_id: id.to_string(),
                    description: Some(name.to_string()),
                    creation_date: inventory_date,
                })
                .collect(),
        }
    }

    async fn open_cache(dir: &tempfile::TempDir) -> SqliteCache {
        SqliteCache::open(dir.path().join("cache.db"), "test-account")
            .await
            .unwrap()
    }

    #[test]
    fn effective_seen_date_is_exactly_the_later_bound() {
        // max(T0, T1 - L)
        assert_eq!(effective_seen_date(1_000, 1_050, 100), 1_000);
        assert_eq!(effective_seen_date(1_000, 2_000, 100), 1_900);
        assert_eq!(effective_seen_date(1_000, 1_100, 100), 1_000);
    }

    #[tokio::test]
    async fn unknown_upstream_archives_are_adopted() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;

        let anomalies = cache
            .apply_snapshot(&snapshot(5_000, 5_010, &[("U1", "elsewhere")]), &policy(false))
            .await
            .unwrap();
        assert!(anomalies.is_empty());

        let row = cache
            .resolve("v", &Reference::parse("elsewhere"))
            .await
            .unwrap();
        assert_eq!(row.archive_id, "U1");
        assert_eq!(row.created_local, None);
        assert_eq!(row.last_seen_upstream, Some(5_000));
    }

    #[tokio::test]
    async fn round_trip_confirms_without_touching_identity() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 4_000)
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(5_000, 5_010, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();
        assert!(anomalies.is_empty());

        let row = cache.resolve("v", &Reference::parse("doc1")).await.unwrap();
        assert_eq!(row.archive_id, "id1");
        assert_eq!(row.name.as_deref(), Some("doc1"));
        assert!(row.last_seen_upstream.unwrap() >= 5_000);
    }

    #[tokio::test]
    async fn missing_names_are_filled_in_silently() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache.add_archive("v", None, "id1", 4_000).await.unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(5_000, 5_010, &[("id1", "found-name")]), &policy(false))
            .await
            .unwrap();
        assert!(anomalies.is_empty());
        assert_eq!(
            cache
                .archive_name("v", &Reference::parse("id:id1"))
                .await
                .unwrap()
                .as_deref(),
            Some("found-name")
        );
    }

    #[tokio::test]
    async fn rename_warns_and_keeps_local_name_by_default() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("old-name"), "id1", 4_000)
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(5_000, 5_010, &[("id1", "new-name")]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::Renamed {
                archive_id: "id1".to_string(),
                old: "old-name".to_string(),
                new: "new-name".to_string(),
                fixed: false,
            }]
        );
        assert_eq!(
            cache
                .archive_name("v", &Reference::parse("id:id1"))
                .await
                .unwrap()
                .as_deref(),
            Some("old-name")
        );
    }

    #[tokio::test]
    async fn rename_overwrites_under_fix() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("old-name"), "id1", 4_000)
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(5_000, 5_010, &[("id1", "new-name")]), &policy(true))
            .await
            .unwrap();
        assert!(matches!(anomalies[0], Anomaly::Renamed { fixed: true, .. }));
        assert_eq!(
            cache
                .archive_name("v", &Reference::parse("id:id1"))
                .await
                .unwrap()
                .as_deref(),
            Some("new-name")
        );
    }

    #[tokio::test]
    async fn last_seen_never_moves_backward() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 4_000)
            .await
            .unwrap();

        cache
            .apply_snapshot(&snapshot(6_000, 6_010, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();
        // An older snapshot arriving late must not regress the timestamp.
        cache
            .apply_snapshot(&snapshot(5_000, 5_010, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();

        let row = cache.resolve("v", &Reference::parse("doc1")).await.unwrap();
        assert_eq!(row.last_seen_upstream, Some(6_000));
    }

    #[tokio::test]
    async fn reconciling_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 4_000)
            .await
            .unwrap();

        let snap = snapshot(5_000, 5_010, &[("id1", "doc1"), ("U1", "elsewhere")]);
        let first = cache.apply_snapshot(&snap, &policy(false)).await.unwrap();
        let second = cache.apply_snapshot(&snap, &policy(false)).await.unwrap();
        assert_eq!(first, second);

        let row = cache.resolve("v", &Reference::parse("doc1")).await.unwrap();
        assert_eq!(row.last_seen_upstream, Some(5_000));
        assert_eq!(cache.list_live("v").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn tombstone_listed_by_older_inventory_is_benign() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 500)
            .await
            .unwrap();
        cache
            .mark_deleted("v", &Reference::parse("doc1"), 1_000)
            .await
            .unwrap();

        // Inventory generated before the delete still lists the archive.
        let anomalies = cache
            .apply_snapshot(&snapshot(900, 910, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::DeleteNotYetPropagated {
                reference: "doc1".to_string()
            }]
        );
        assert!(cache.get_any("v", "id1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tombstone_listed_by_newer_inventory_warns() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 500)
            .await
            .unwrap();
        cache
            .mark_deleted("v", &Reference::parse("doc1"), 1_000)
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(1_500, 1_510, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::StillPresentAfterDelete {
                reference: "doc1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn tombstone_absent_from_older_inventory_is_retained() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 400)
            .await
            .unwrap();
        cache
            .mark_deleted("v", &Reference::parse("doc1"), 1_000)
            .await
            .unwrap();

        // inventory_date = 500 predates the tombstone: too early to read
        // the absence as confirmation.
        cache
            .apply_snapshot(&snapshot(500, 510, &[]), &policy(false))
            .await
            .unwrap();
        assert!(cache.get_any("v", "id1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tombstone_absent_from_newer_inventory_is_purged() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 400)
            .await
            .unwrap();
        cache
            .mark_deleted("v", &Reference::parse("doc1"), 1_000)
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(1_500, 1_510, &[]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::DeleteConfirmed {
                reference: "doc1".to_string()
            }]
        );
        assert!(cache.get_any("v", "id1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn confirmed_archive_vanishing_warns_but_stays_queryable() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 1_000)
            .await
            .unwrap();
        cache
            .apply_snapshot(&snapshot(2_000, 2_010, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();

        // Gone from a much later inventory.
        let anomalies = cache
            .apply_snapshot(&snapshot(9_000, 9_010, &[]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::Disappeared {
                reference: "doc1".to_string(),
                purged: false,
            }]
        );

        let row = cache.resolve("v", &Reference::parse("doc1")).await.unwrap();
        assert_eq!(row.last_seen_upstream, Some(2_000));
    }

    #[tokio::test]
    async fn disappeared_archive_is_purged_under_fix() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 1_000)
            .await
            .unwrap();
        cache
            .apply_snapshot(&snapshot(2_000, 2_010, &[("id1", "doc1")]), &policy(false))
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(9_000, 9_010, &[]), &policy(true))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::Disappeared {
                reference: "doc1".to_string(),
                purged: true,
            }]
        );
        assert!(cache.get_any("v", "id1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn never_confirmed_but_old_archive_counts_as_disappeared() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        // Created long before the inventory lag window.
        cache
            .add_archive("v", Some("doc1"), "id1", 1_000)
            .await
            .unwrap();

        let anomalies = cache
            .apply_snapshot(&snapshot(1_000 + LAG + 1, 1_000 + LAG + 2, &[]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::Disappeared {
                reference: "doc1".to_string(),
                purged: false,
            }]
        );
    }

    #[tokio::test]
    async fn fresh_upload_missing_from_inventory_is_only_noted() {
        let dir = tempdir().unwrap();
        let cache = open_cache(&dir).await;
        cache
            .add_archive("v", Some("doc1"), "id1", 1_000)
            .await
            .unwrap();

        // Inventory dated within the lag window of creation.
        let anomalies = cache
            .apply_snapshot(&snapshot(1_050, 1_060, &[]), &policy(false))
            .await
            .unwrap();
        assert_eq!(
            anomalies,
            vec![Anomaly::NotYetInInventory {
                reference: "doc1".to_string()
            }]
        );
        // No mutation: still resolvable with its optimistic last-seen.
        assert_eq!(
            cache
                .last_seen("v", &Reference::parse("doc1"))
                .await
                .unwrap(),
            Some(1_000)
        );
    }
}
