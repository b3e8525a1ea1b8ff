//! Application wiring: configuration, cache handle, job tracker.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use icebox_cache::SqliteCache;
use icebox_core::AppConfig;
use icebox_remote::{JobTracker, RetryPolicy};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;

/// Everything a command needs: the loaded configuration, the account-scoped
/// record store, and a job tracker over the configured remote.
pub struct AppContext {
    pub config: AppConfig,
    pub cache: SqliteCache,
    pub tracker: JobTracker,
}

impl AppContext {
    /// Wire up the cache and remote from a loaded configuration.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = icebox_remote::from_config(&config.remote)
            .await
            .context("failed to initialize remote vault store")?;

        let db_path = config
            .cache
            .database_path()
            .context("cannot determine cache database path (set cache.path, or HOME)")?;
        let cache = SqliteCache::open(&db_path, store.account_key())
            .await
            .with_context(|| format!("failed to open cache database {}", db_path.display()))?;
        tracing::debug!(db = %db_path.display(), "cache database opened");

        Ok(Self {
            config,
            cache,
            tracker: JobTracker::new(store),
        })
    }

    /// Polling cadence for blocking job waits, from configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.config.sync.poll_interval_secs),
            self.config.sync.poll_max_attempts,
        )
    }

    /// Current wall-clock time in unix seconds.
    pub fn now(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Load configuration from an optional TOML file layered under
/// `ICEBOX_`-prefixed environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::new();

    let has_config_file = match config_path {
        Some(path) if path.exists() => {
            tracing::debug!(config_path = %path.display(), "loading configuration file");
            figment = figment.merge(Toml::file(path));
            true
        }
        Some(path) => {
            tracing::debug!(config_path = %path.display(), "no config file at path");
            false
        }
        None => false,
    };

    // ICEBOX_CONFIG only names the file; it doesn't configure anything.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("ICEBOX_") && key != "ICEBOX_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "no configuration provided\n\n\
             Provide configuration via one of:\n  \
             1. Config file: icebox --config /path/to/icebox.toml ...\n  \
             2. Environment variables: ICEBOX_REMOTE__BACKEND=http \
             ICEBOX_REMOTE__ENDPOINT=https://vault.example.com icebox ...\n\n\
             At minimum the [remote] section must be configured."
        );
    }

    figment
        .merge(Env::prefixed("ICEBOX_").split("__"))
        .extract()
        .context("failed to load configuration")
}
