//! Atomic snapshot store.
//!
//! Layout under the data directory:
//!
//! ```text
//! context-snapshots/
//!     <session_id>/
//!         index.json             # list of {id, created_at, token_count, summary, bytes}
//!         <snapshot_id>.json     # one per snapshot
//! ```
//!
//! Every write goes to `<file>.tmp`, is fsync'd, then atomically renamed;
//! the rename is the sole commit point. The index is rewritten the same
//! way, so a crash leaves either the previous complete index or the new
//! complete one, never a torn file.
//!
//! Corrupt payloads are marked in the index and skipped, but retained on
//! disk for forensic inspection. The loader never panics on garbage.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ember_core::{ConversationState, EmberError, Result, SessionId, SnapshotId};

use crate::snapshot::{Snapshot, SnapshotMetadata};

/// Directory under the data dir holding all session snapshot trees.
pub const SNAPSHOTS_DIR: &str = "context-snapshots";

/// One row of `index.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Snapshot identity.
    pub id: SnapshotId,
    /// Capture instant.
    pub created_at: DateTime<Utc>,
    /// Accounted token total at capture time.
    pub token_count: u64,
    /// Short human description.
    pub summary: String,
    /// Payload size on disk.
    pub bytes: u64,
    /// Set when the payload failed validation; such entries are skipped.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub corrupt: bool,
}

/// Durable store for one data directory. Cheap to clone paths from; all
/// state lives on disk.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Open a store rooted at `<data_dir>/context-snapshots`.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(SNAPSHOTS_DIR),
        }
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn payload_path(&self, session_id: &SessionId, id: &SnapshotId) -> PathBuf {
        self.session_dir(session_id).join(format!("{id}.json"))
    }

    fn index_path(&self, session_id: &SessionId) -> PathBuf {
        self.session_dir(session_id).join("index.json")
    }

    // ── Save ────────────────────────────────────────────────────────────

    /// Capture and durably persist `state`. Returns only after the payload
    /// rename succeeded; the index update rides behind the same guarantee.
    pub fn save(
        &self,
        state: &ConversationState,
        metadata: SnapshotMetadata,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<SnapshotId> {
        let snapshot = Snapshot::capture(state, metadata, summary, now);
        let session_id = snapshot.session_id.clone();
        let dir = self.session_dir(&session_id);
        fs::create_dir_all(&dir).map_err(|e| EmberError::storage("create_dir_all", e))?;

        let payload = serde_json::to_vec_pretty(&snapshot).map_err(|e| {
            EmberError::storage(
                "serialize",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        let path = self.payload_path(&session_id, &snapshot.id);
        write_atomic(&path, &payload)?;

        let mut index = self.read_index(&session_id);
        index.push(IndexEntry {
            id: snapshot.id.clone(),
            created_at: snapshot.created_at,
            token_count: snapshot.token_count,
            summary: snapshot.summary.clone(),
            bytes: payload.len() as u64,
            corrupt: false,
        });
        self.write_index(&session_id, &index)?;

        info!(
            session_id = %session_id,
            snapshot_id = %snapshot.id,
            bytes = payload.len(),
            "snapshot saved"
        );
        Ok(snapshot.id)
    }

    // ── Load ────────────────────────────────────────────────────────────

    /// Load and validate a snapshot payload.
    ///
    /// On validation failure the entry is marked corrupt in the index
    /// (best-effort) and [`EmberError::Corrupt`] is returned; the payload
    /// stays on disk.
    pub fn load(&self, session_id: &SessionId, id: &SnapshotId) -> Result<Snapshot> {
        let path = self.payload_path(session_id, id);
        let raw = fs::read_to_string(&path).map_err(|e| EmberError::storage("read", e))?;

        let outcome = parse_snapshot(id, &raw);
        if let Err(EmberError::Corrupt { reason, .. }) = &outcome {
            warn!(
                session_id = %session_id,
                snapshot_id = %id,
                %reason,
                "snapshot failed validation, marking corrupt"
            );
            self.mark_corrupt(session_id, id);
        }
        outcome
    }

    /// Load a snapshot and rebuild the conversation state it captured.
    pub fn load_state(&self, session_id: &SessionId, id: &SnapshotId) -> Result<ConversationState> {
        let result = self.load(session_id, id)?.into_state();
        if let Err(EmberError::Corrupt { .. }) = &result {
            self.mark_corrupt(session_id, id);
        }
        result
    }

    // ── List / delete / prune ───────────────────────────────────────────

    /// List valid snapshots for a session, oldest first, from the index
    /// alone; payloads are not opened.
    #[must_use]
    pub fn list(&self, session_id: &SessionId) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = self
            .read_index(session_id)
            .into_iter()
            .filter(|e| !e.corrupt)
            .filter(|e| self.payload_path(session_id, &e.id).exists())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        entries
    }

    /// Remove a snapshot's payload and index entry.
    ///
    /// The index rewrite is the commit point; payload removal after it is
    /// best-effort (an orphaned payload is unreachable and harmless).
    pub fn delete(&self, session_id: &SessionId, id: &SnapshotId) -> Result<()> {
        let mut index = self.read_index(session_id);
        let before = index.len();
        index.retain(|e| &e.id != id);
        if index.len() != before {
            self.write_index(session_id, &index)?;
        }
        match fs::remove_file(self.payload_path(session_id, id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(snapshot_id = %id, error = %e, "payload removal failed after index commit");
                Ok(())
            }
        }
    }

    /// Delete oldest snapshots until at most `max_count` remain. Corrupt
    /// entries do not count toward retention but are never pruned (they are
    /// kept for inspection). Returns the ids removed.
    pub fn prune(&self, session_id: &SessionId, max_count: usize) -> Result<Vec<SnapshotId>> {
        let entries = self.list(session_id);
        if entries.len() <= max_count {
            return Ok(Vec::new());
        }
        let excess = entries.len() - max_count;
        let mut removed = Vec::with_capacity(excess);
        for entry in &entries[..excess] {
            self.delete(session_id, &entry.id)?;
            removed.push(entry.id.clone());
        }
        debug!(session_id = %session_id, removed = removed.len(), "pruned snapshots");
        Ok(removed)
    }

    // ── Index internals ─────────────────────────────────────────────────

    /// Read the index, tolerating absence and garbage (both yield empty;
    /// the payloads are still on disk; an unreadable index only loses the
    /// listing until the next save rewrites it).
    fn read_index(&self, session_id: &SessionId) -> Vec<IndexEntry> {
        let path = self.index_path(session_id);
        match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(?path, error = %e, "index unreadable, treating as empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    fn write_index(&self, session_id: &SessionId, entries: &[IndexEntry]) -> Result<()> {
        let payload = serde_json::to_vec_pretty(entries).map_err(|e| {
            EmberError::storage(
                "serialize_index",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        write_atomic(&self.index_path(session_id), &payload)
    }

    /// Flag an entry as corrupt, best-effort.
    fn mark_corrupt(&self, session_id: &SessionId, id: &SnapshotId) {
        let mut index = self.read_index(session_id);
        let mut changed = false;
        for entry in &mut index {
            if &entry.id == id && !entry.corrupt {
                entry.corrupt = true;
                changed = true;
            }
        }
        if changed {
            if let Err(e) = self.write_index(session_id, &index) {
                warn!(snapshot_id = %id, error = %e, "failed to record corruption in index");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse and validate a raw payload.
fn parse_snapshot(id: &SnapshotId, raw: &str) -> Result<Snapshot> {
    let corrupt = |reason| EmberError::Corrupt {
        snapshot_id: id.clone().into_inner(),
        reason,
    };

    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        corrupt(ember_core::CorruptReason::InvalidJson {
            detail: e.to_string(),
        })
    })?;
    Snapshot::validate_value(&value).map_err(corrupt)?;
    serde_json::from_value(value).map_err(|e| {
        corrupt(ember_core::CorruptReason::InvalidJson {
            detail: e.to_string(),
        })
    })
}

/// Write `bytes` to `path` via tmp + fsync + atomic rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file =
            fs::File::create(&tmp).map_err(|e| EmberError::storage("create_tmp", e))?;
        file.write_all(bytes)
            .map_err(|e| EmberError::storage("write_tmp", e))?;
        file.sync_all().map_err(|e| EmberError::storage("fsync", e))?;
    }
    fs::rename(&tmp, path).map_err(|e| {
        // Leave no droppings behind a failed commit.
        let _ = fs::remove_file(&tmp);
        EmberError::storage("rename", e)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
