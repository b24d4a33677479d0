//! Error hierarchy for the ember engine.
//!
//! One structured enum, [`EmberError`], covers every failure the engine
//! surfaces to callers:
//!
//! - [`EmberError::BudgetExceeded`]: a send cannot fit even after emergency
//!   compression and rollover would itself fail; fatal for that send
//! - [`EmberError::Busy`]: a mutation was requested while compression or a
//!   restore holds the exclusion lock; retryable
//! - [`EmberError::Timeout`]: lock wait or summarizer deadline exceeded;
//!   retryable with backoff
//! - [`EmberError::Corrupt`]: a snapshot file failed validation;
//!   non-retryable for that file, others remain usable
//! - [`EmberError::InvalidConfig`]: a proposed config violates invariants;
//!   rejected without mutation
//! - [`EmberError::StorageFailure`]: a disk write or rename failed; the
//!   snapshot is lost but in-memory state is intact
//! - [`EmberError::Invariant`]: a post-mutation consistency check failed and
//!   the mutation was rolled back

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EmberError>;

// ─────────────────────────────────────────────────────────────────────────────
// Corruption classification
// ─────────────────────────────────────────────────────────────────────────────

/// Why a snapshot file was classified as corrupt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CorruptReason {
    /// The file was not parseable JSON.
    InvalidJson {
        /// Parser diagnostic.
        detail: String,
    },
    /// A required field was absent.
    MissingField {
        /// Name of the missing field.
        field: String,
    },
    /// The file's schema version is newer than this build supports.
    UnsupportedSchema {
        /// Version found in the file.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },
    /// The token-sum invariant did not hold on load.
    TokenSumMismatch {
        /// Recorded total.
        recorded: u64,
        /// Total recomputed from the payload.
        computed: u64,
    },
}

impl std::fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson { detail } => write!(f, "invalid JSON: {detail}"),
            Self::MissingField { field } => write!(f, "missing required field '{field}'"),
            Self::UnsupportedSchema { found, supported } => {
                write!(f, "schema version {found} newer than supported {supported}")
            }
            Self::TokenSumMismatch { recorded, computed } => {
                write!(f, "token sum mismatch: recorded {recorded}, computed {computed}")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EmberError — top-level error enum
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the ember engine.
#[derive(Debug, Error)]
pub enum EmberError {
    /// A message or tool result cannot fit in the pool even after emergency
    /// measures.
    #[error("budget exceeded: {required} tokens required, {available} available")]
    BudgetExceeded {
        /// Tokens the send would need.
        required: u64,
        /// Tokens the pool can still hold.
        available: u64,
    },

    /// A mutation was requested while the exclusion lock is held.
    #[error("busy: {operation} rejected while compression or restore is running")]
    Busy {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A deadline expired while waiting on the lock or the summarizer.
    #[error("timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The deadline that expired.
        timeout_ms: u64,
    },

    /// A snapshot file failed validation.
    #[error("snapshot {snapshot_id} is corrupt: {reason}")]
    Corrupt {
        /// The offending snapshot.
        snapshot_id: String,
        /// Classification of the corruption.
        reason: CorruptReason,
    },

    /// A proposed pool or engine configuration violates invariants.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },

    /// A disk write, sync, or rename failed.
    #[error("storage failure during {operation}: {source}")]
    StorageFailure {
        /// The filesystem operation that failed.
        operation: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A post-mutation consistency check failed; the mutation was rolled back.
    #[error("invariant violated: {detail}")]
    Invariant {
        /// Which invariant, and the observed values.
        detail: String,
    },
}

impl EmberError {
    /// Shorthand for a [`EmberError::StorageFailure`].
    #[must_use]
    pub fn storage(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::StorageFailure {
            operation: operation.into(),
            source,
        }
    }

    /// Shorthand for an [`EmberError::InvalidConfig`].
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Timeout { .. })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
