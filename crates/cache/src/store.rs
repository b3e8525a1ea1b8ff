//! SQLite-backed archive record store.

use crate::error::{CacheError, CacheResult};
use crate::models::ArchiveRow;
use icebox_core::Reference;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS archives (
    account TEXT NOT NULL,
    vault TEXT NOT NULL,
    archive_id TEXT NOT NULL,
    name TEXT,
    created_local INTEGER,
    deleted_local INTEGER,
    last_seen_upstream INTEGER,
    PRIMARY KEY (account, vault, archive_id)
);
CREATE INDEX IF NOT EXISTS idx_archives_name ON archives (account, vault, name);
"#;

/// Archive record store on a local SQLite database.
///
/// A handle is scoped to one account key at construction; every query
/// filters on it, so one database file can serve several remote identities
/// without their namespaces colliding. Concurrent CLI invocations against
/// the same database are serialized by SQLite itself; each mutating
/// operation here is a single statement or an explicit transaction.
pub struct SqliteCache {
    pool: Pool<Sqlite>,
    account: String,
}

impl SqliteCache {
    /// Open (creating if necessary) the cache database at `path`.
    pub async fn open(path: impl AsRef<Path>, account: impl Into<String>) -> CacheResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::Database(sqlx::Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to create cache directory: {e}"),
                )))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors when another
            // invocation holds the write lock.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent lock failures across tasks.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            account: account.into(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> CacheResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Account key this handle is scoped to.
    pub fn account(&self) -> &str {
        &self.account
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Record a locally-created archive. Fails with `AlreadyExists` rather
    /// than silently overwriting a known id.
    pub async fn add_archive(
        &self,
        vault: &str,
        name: Option<&str>,
        archive_id: &str,
        created_at: i64,
    ) -> CacheResult<()> {
        if self.get_any(vault, archive_id).await?.is_some() {
            return Err(CacheError::AlreadyExists(archive_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO archives (account, vault, archive_id, name, created_local) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.account)
        .bind(vault)
        .bind(archive_id)
        .bind(name)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Resolve a reference against live (non-tombstoned) records.
    ///
    /// A name reference matching two or more live records fails with
    /// `Ambiguous`; the caller must re-specify id-qualified. This applies to
    /// explicit `name:` references and bare names alike, so no reference
    /// form can silently pick one of several archives.
    pub async fn resolve(&self, vault: &str, reference: &Reference) -> CacheResult<ArchiveRow> {
        match reference {
            Reference::ById(id) => {
                let row = sqlx::query_as::<_, ArchiveRow>(
                    "SELECT * FROM archives \
                     WHERE account = ? AND vault = ? AND archive_id = ? AND deleted_local IS NULL",
                )
                .bind(&self.account)
                .bind(vault)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
                row.ok_or_else(|| CacheError::NotFound(reference.to_string()))
            }
            Reference::ByName(name) => {
                let mut rows = sqlx::query_as::<_, ArchiveRow>(
                    "SELECT * FROM archives \
                     WHERE account = ? AND vault = ? AND name = ? AND deleted_local IS NULL",
                )
                .bind(&self.account)
                .bind(vault)
                .bind(name)
                .fetch_all(&self.pool)
                .await?;
                match rows.len() {
                    0 => Err(CacheError::NotFound(reference.to_string())),
                    1 => Ok(rows.remove(0)),
                    count => Err(CacheError::Ambiguous {
                        reference: name.clone(),
                        count,
                    }),
                }
            }
        }
    }

    /// Remote identifier for a resolved reference.
    pub async fn archive_id(&self, vault: &str, reference: &Reference) -> CacheResult<String> {
        Ok(self.resolve(vault, reference).await?.archive_id)
    }

    /// Name of a resolved reference, if it has one.
    pub async fn archive_name(
        &self,
        vault: &str,
        reference: &Reference,
    ) -> CacheResult<Option<String>> {
        Ok(self.resolve(vault, reference).await?.name)
    }

    /// Last time the referenced archive was known to exist: the upstream
    /// confirmation if any, else its local creation time.
    pub async fn last_seen(&self, vault: &str, reference: &Reference) -> CacheResult<Option<i64>> {
        Ok(self.resolve(vault, reference).await?.last_seen())
    }

    /// Tombstone the resolved record. The row is retained until an
    /// inventory dated after `deleted_at` confirms the archive is gone.
    pub async fn mark_deleted(
        &self,
        vault: &str,
        reference: &Reference,
        deleted_at: i64,
    ) -> CacheResult<()> {
        let row = self.resolve(vault, reference).await?;
        let result = sqlx::query(
            "UPDATE archives SET deleted_local = ? \
             WHERE account = ? AND vault = ? AND archive_id = ? AND deleted_local IS NULL",
        )
        .bind(deleted_at)
        .bind(&self.account)
        .bind(vault)
        .bind(&row.archive_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CacheError::NotFound(reference.to_string()));
        }
        Ok(())
    }

    /// Reference strings for all live archives in a vault, sorted by name.
    ///
    /// Names unique among live records yield the bare form. When two or
    /// more live records share a name, EVERY sharer is emitted id-qualified
    /// (`id:<id>\t<name>`) so that none of the returned references is
    /// ambiguous to a later caller.
    pub async fn list_live(&self, vault: &str) -> CacheResult<Vec<String>> {
        let rows = self.live_rows_sorted(vault).await?;

        let mut refs = Vec::with_capacity(rows.len());
        let mut i = 0;
        while i < rows.len() {
            let mut j = i + 1;
            while j < rows.len() && rows[j].name == rows[i].name {
                j += 1;
            }
            if j - i == 1 {
                refs.push(rows[i].live_ref());
            } else {
                for row in &rows[i..j] {
                    refs.push(row.id_qualified_ref());
                }
            }
            i = j;
        }
        Ok(refs)
    }

    /// Id-qualified listing of all live archives in a vault.
    pub async fn list_with_ids(&self, vault: &str) -> CacheResult<Vec<String>> {
        let rows = self.live_rows_sorted(vault).await?;
        Ok(rows.iter().map(ArchiveRow::id_qualified_ref).collect())
    }

    async fn live_rows_sorted(&self, vault: &str) -> CacheResult<Vec<ArchiveRow>> {
        let rows = sqlx::query_as::<_, ArchiveRow>(
            "SELECT * FROM archives \
             WHERE account = ? AND vault = ? AND deleted_local IS NULL \
             ORDER BY name, archive_id",
        )
        .bind(&self.account)
        .bind(vault)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Fetch a row by id, tombstoned or not. Used by reconciliation.
    pub(crate) async fn get_any(
        &self,
        vault: &str,
        archive_id: &str,
    ) -> CacheResult<Option<ArchiveRow>> {
        let row = sqlx::query_as::<_, ArchiveRow>(
            "SELECT * FROM archives WHERE account = ? AND vault = ? AND archive_id = ?",
        )
        .bind(&self.account)
        .bind(vault)
        .bind(archive_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
