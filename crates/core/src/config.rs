//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Local reconciliation cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Remote vault store to talk to.
    pub remote: RemoteConfig,
    /// Synchronization and staleness policy.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Create a test configuration backed by a filesystem remote with
    /// immediately-completing jobs.
    ///
    /// **For testing only.**
    pub fn for_testing(remote_root: &Path, db_path: &Path) -> Self {
        Self {
            cache: CacheConfig {
                path: Some(db_path.to_path_buf()),
            },
            remote: RemoteConfig::Filesystem {
                root: remote_root.to_path_buf(),
                job_delay_secs: 0,
                account: None,
            },
            sync: SyncConfig::default(),
        }
    }
}

/// Local cache database configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to the cache database. Defaults to
    /// `$XDG_CACHE_HOME/icebox/cache.db` (or `~/.cache/icebox/cache.db`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolve the database path, consulting XDG conventions when no
    /// explicit path is configured. `None` when no home directory can be
    /// determined.
    pub fn database_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        user_cache_dir().map(|dir| dir.join("icebox").join("cache.db"))
    }
}

fn user_cache_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME")
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache"))
}

/// Remote vault store configuration.
///
/// The account key scopes the local cache so that one database can serve
/// multiple remote identities without their vault or archive namespaces
/// colliding. It defaults to something stable derived from the remote's
/// identity and can be overridden when two configurations are known to
/// address the same namespace.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum RemoteConfig {
    /// HTTP vault service.
    Http {
        /// Base URL of the service, e.g. `https://vault.example.com`.
        endpoint: String,
        /// Bearer token for authentication.
        #[serde(default)]
        token: Option<String>,
        /// Cache scoping key override.
        #[serde(default)]
        account: Option<String>,
    },
    /// Local directory tree with simulated asynchronous jobs. Intended for
    /// development and testing.
    Filesystem {
        /// Root directory of the simulated remote.
        root: PathBuf,
        /// Seconds a submitted job stays in progress before completing.
        #[serde(default)]
        job_delay_secs: u64,
        /// Cache scoping key override.
        #[serde(default)]
        account: Option<String>,
    },
}

/// Synchronization and staleness policy.
///
/// These are deliberate, visible knobs: the inventory lag bound, the two
/// staleness windows, and the job polling cadence are configuration, not
/// hidden defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound in seconds on how stale an inventory regeneration may be
    /// relative to the job that retrieved it.
    #[serde(default = "default_inventory_lag_secs")]
    pub inventory_lag_secs: i64,
    /// Default completed-inventory freshness window for `vault sync`, in
    /// hours. Zero forces a fresh inventory job.
    #[serde(default = "default_sync_max_age_hours")]
    pub sync_max_age_hours: u64,
    /// Default last-seen freshness window for presence checks, in hours.
    #[serde(default = "default_checkpresent_max_age_hours")]
    pub checkpresent_max_age_hours: u64,
    /// Interval between job status polls while waiting.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of poll attempts before a wait times out.
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
}

fn default_inventory_lag_secs() -> i64 {
    crate::DEFAULT_INVENTORY_LAG_SECS
}

fn default_sync_max_age_hours() -> u64 {
    24
}

fn default_checkpresent_max_age_hours() -> u64 {
    80
}

fn default_poll_interval_secs() -> u64 {
    600
}

fn default_poll_max_attempts() -> u32 {
    144
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            inventory_lag_secs: default_inventory_lag_secs(),
            sync_max_age_hours: default_sync_max_age_hours(),
            checkpresent_max_age_hours: default_checkpresent_max_age_hours(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_max_attempts: default_poll_max_attempts(),
        }
    }
}
