//! # ember-snapshots
//!
//! Durable persistence of full recoverable conversation state.
//!
//! - **[`Snapshot`]**: the schema-versioned on-disk record (full message
//!   list including the system prompt, checkpoints, metadata)
//! - **[`SnapshotStore`]**: atomic writes (tmp + fsync + rename), an
//!   `index.json` for O(1) listing, corruption classification that never
//!   crashes the loader, and bounded retention
//! - **[`SessionLock`]**: one process per session directory
//! - **legacy migration**: moves the old `session-data/<id>/snapshots/`
//!   tree into place on startup
//!
//! The atomic rename is the sole commit point: after `save` returns, the
//! snapshot survives an immediate crash and is listable and loadable.

#![deny(unsafe_code)]

pub mod lock;
pub mod migration;
pub mod snapshot;
pub mod store;

pub use lock::SessionLock;
pub use migration::migrate_legacy_layout;
pub use snapshot::{Snapshot, SnapshotMetadata, SCHEMA_VERSION};
pub use store::{IndexEntry, SnapshotStore};
