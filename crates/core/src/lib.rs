//! Core domain types shared across the Icebox crates.
//!
//! This crate defines the canonical data model used everywhere else:
//! - Archive references (id-qualified, name-qualified, bare) and their
//!   canonical string forms
//! - Inventory snapshots as handed from the transport layer to the
//!   reconciler
//! - Archive description validation rules imposed by the remote service
//! - Application configuration

pub mod config;
pub mod description;
pub mod error;
pub mod reference;
pub mod snapshot;

pub use config::{AppConfig, CacheConfig, RemoteConfig, SyncConfig};
pub use description::{MAX_DESCRIPTION_BYTES, validate_description};
pub use error::{Error, Result};
pub use reference::Reference;
pub use snapshot::{InventoryEntry, InventorySnapshot};

/// There is a lag between an archive being created and the archive appearing
/// on an inventory. Even if the inventory is dated after the archive was
/// created, it still doesn't necessarily appear. An archive is only treated
/// as missing once it has failed to appear on an inventory generated this
/// many seconds after the archive was stored successfully (3 days).
pub const DEFAULT_INVENTORY_LAG_SECS: i64 = 3 * 24 * 60 * 60;
