//! Legacy layout migration.
//!
//! Older builds kept snapshots under `session-data/<session_id>/snapshots/`.
//! On startup the tree is moved (renamed, never copied twice) into
//! `context-snapshots/<session_id>/`, and the legacy parent is removed only
//! after every file is in place. A failed migration leaves whatever has not
//! yet moved exactly where it was.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use ember_core::{EmberError, Result};

use crate::store::SNAPSHOTS_DIR;

/// Legacy parent directory name.
const LEGACY_DIR: &str = "session-data";

/// Migrate any legacy session trees under `data_dir`.
///
/// Returns the number of sessions moved. Absence of the legacy tree is the
/// common case and returns zero without touching disk.
pub fn migrate_legacy_layout(data_dir: &Path) -> Result<usize> {
    let legacy_root = data_dir.join(LEGACY_DIR);
    if !legacy_root.is_dir() {
        return Ok(0);
    }

    let new_root = data_dir.join(SNAPSHOTS_DIR);
    fs::create_dir_all(&new_root).map_err(|e| EmberError::storage("create_dir_all", e))?;

    let mut moved = 0usize;
    let sessions =
        fs::read_dir(&legacy_root).map_err(|e| EmberError::storage("read_legacy_dir", e))?;
    for entry in sessions {
        let entry = entry.map_err(|e| EmberError::storage("read_legacy_dir", e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let session_id = entry.file_name();
        let legacy_snapshots = entry.path().join("snapshots");
        if !legacy_snapshots.is_dir() {
            continue;
        }
        let dest = new_root.join(&session_id);

        if dest.exists() {
            move_files(&legacy_snapshots, &dest)?;
        } else {
            fs::rename(&legacy_snapshots, &dest)
                .map_err(|e| EmberError::storage("rename_session_dir", e))?;
        }

        // All files are in place; now the legacy session dir may go.
        remove_dir_best_effort(&entry.path());
        info!(session = ?session_id, "migrated legacy snapshot directory");
        moved += 1;
    }

    // Remove the legacy parent only once it is empty.
    remove_dir_best_effort(&legacy_root);
    Ok(moved)
}

/// Move every file from `from` into `to`, one rename at a time.
fn move_files(from: &Path, to: &Path) -> Result<()> {
    let entries = fs::read_dir(from).map_err(|e| EmberError::storage("read_dir", e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EmberError::storage("read_dir", e))?;
        let dest = to.join(entry.file_name());
        if dest.exists() {
            // Never overwrite: the new tree wins, the legacy copy stays put.
            warn!(file = ?entry.file_name(), "migration target exists, leaving legacy file");
            continue;
        }
        fs::rename(entry.path(), &dest).map_err(|e| EmberError::storage("rename", e))?;
    }
    remove_dir_best_effort(from);
    Ok(())
}

/// Remove a directory if (and only if) it is empty; never errors.
/// Non-empty or already-gone directories are left as they are.
fn remove_dir_best_effort(path: &Path) {
    let _ = fs::remove_dir(path);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_legacy(data_dir: &Path, session: &str, files: &[&str]) {
        let dir = data_dir.join(LEGACY_DIR).join(session).join("snapshots");
        fs::create_dir_all(&dir).unwrap();
        for file in files {
            fs::write(dir.join(file), format!("{{\"name\": \"{file}\"}}")).unwrap();
        }
    }

    #[test]
    fn no_legacy_tree_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(migrate_legacy_layout(dir.path()).unwrap(), 0);
        assert!(!dir.path().join(SNAPSHOTS_DIR).exists());
    }

    #[test]
    fn moves_whole_session_directories() {
        let dir = tempfile::tempdir().unwrap();
        seed_legacy(dir.path(), "sess-1", &["a.json", "index.json"]);
        seed_legacy(dir.path(), "sess-2", &["b.json"]);

        let moved = migrate_legacy_layout(dir.path()).unwrap();
        assert_eq!(moved, 2);

        let new_root = dir.path().join(SNAPSHOTS_DIR);
        assert!(new_root.join("sess-1").join("a.json").exists());
        assert!(new_root.join("sess-1").join("index.json").exists());
        assert!(new_root.join("sess-2").join("b.json").exists());
        // legacy parent is gone once empty
        assert!(!dir.path().join(LEGACY_DIR).exists());
    }

    #[test]
    fn merges_into_existing_destination_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        seed_legacy(dir.path(), "sess-1", &["a.json", "dup.json"]);

        let dest = dir.path().join(SNAPSHOTS_DIR).join("sess-1");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("dup.json"), "{\"new\": true}").unwrap();

        let moved = migrate_legacy_layout(dir.path()).unwrap();
        assert_eq!(moved, 1);

        assert!(dest.join("a.json").exists());
        // the new tree's copy won
        let kept = fs::read_to_string(dest.join("dup.json")).unwrap();
        assert!(kept.contains("new"));
        // the legacy duplicate stayed put for inspection
        assert!(dir
            .path()
            .join(LEGACY_DIR)
            .join("sess-1")
            .join("snapshots")
            .join("dup.json")
            .exists());
    }

    #[test]
    fn second_run_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        seed_legacy(dir.path(), "sess-1", &["a.json"]);
        assert_eq!(migrate_legacy_layout(dir.path()).unwrap(), 1);
        assert_eq!(migrate_legacy_layout(dir.path()).unwrap(), 0);
    }

    #[test]
    fn ignores_legacy_sessions_without_snapshots_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(LEGACY_DIR).join("stray")).unwrap();
        assert_eq!(migrate_legacy_layout(dir.path()).unwrap(), 0);
    }
}
