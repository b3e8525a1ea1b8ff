//! Local archive record store and inventory reconciler.
//!
//! This crate provides the authoritative-enough local view of remote archive
//! metadata:
//! - One record per archive ever known, scoped by account key and vault
//! - Reference resolution with ambiguity detection
//! - Tombstone tracking for deletes awaiting upstream confirmation
//! - Reconciliation of delayed inventory snapshots into the record table

pub mod error;
pub mod models;
pub mod reconcile;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use models::ArchiveRow;
pub use reconcile::{Anomaly, ReconcilePolicy, effective_seen_date};
pub use store::SqliteCache;
