//! Session directory ownership.
//!
//! One process owns `snapshots/<session_id>/` at a time. Ownership is a
//! lock file created with `create_new` (the creation is the atomic test).
//! A second session with the same id is rejected with `Busy`; the lock is
//! released on drop.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use ember_core::{EmberError, Result};

/// Name of the lock file inside a session directory.
const LOCK_FILE: &str = "session.lock";

/// Held exclusivity over one session directory.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Acquire the lock for `session_dir`, creating the directory if
    /// needed.
    ///
    /// Fails with [`EmberError::Busy`] if another live session holds it.
    /// A stale lock (left by a crashed process) must be removed out of
    /// band; the engine never steals one.
    pub fn acquire(session_dir: &Path) -> Result<Self> {
        fs::create_dir_all(session_dir)
            .map_err(|e| EmberError::storage("create_session_dir", e))?;
        let path = session_dir.join(LOCK_FILE);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(EmberError::Busy {
                    operation: "acquire_session_lock",
                });
            }
            Err(e) => return Err(EmberError::storage("create_lock", e)),
        };

        let _ = writeln!(file, "{}", std::process::id());
        debug!(?path, "session lock acquired");
        Ok(Self { path })
    }

    /// The lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?self.path, error = %e, "failed to release session lock");
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
