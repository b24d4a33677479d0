//! Engine event definitions.
//!
//! [`EngineEvent`] is the single tagged enum broadcast to external
//! collaborators (UI, session log writer). State-changing operations emit
//! before/after pairs so clients can reflect progress; payloads carry only
//! the figures a client needs, never references into live state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ember_core::{Budget, SnapshotId};

// ─────────────────────────────────────────────────────────────────────────────
// BaseEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Common fields on every engine event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseEvent {
    /// Session this event belongs to.
    pub session_id: String,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

impl BaseEvent {
    /// Create a base event stamped at the given instant.
    #[must_use]
    pub fn at(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: now.to_rfc3339(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Skip reasons
// ─────────────────────────────────────────────────────────────────────────────

/// Why a compression pass made no state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionSkipReason {
    /// The summary would have been larger than what it replaced.
    Inflated,
    /// Recent messages alone exceed the preserve budget; nothing to absorb.
    NothingToAbsorb,
}

// ─────────────────────────────────────────────────────────────────────────────
// EngineEvent
// ─────────────────────────────────────────────────────────────────────────────

/// Externally observable engine state transitions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine came up for a session.
    Started {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// The engine shut down.
    Stopped {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// A message entered the conversation.
    MessageAdded {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Budget after the append.
        budget: Budget,
    },

    /// A compression pass acquired the exclusion lock.
    CompressionStarted {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// A compression pass finished and released the lock.
    CompressionCompleted {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// `compressed_tokens / original_tokens` for the absorbed span.
        ratio: f64,
    },

    /// A compression pass made no state change.
    CompressionSkipped {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Why nothing changed.
        reason: CompressionSkipReason,
    },

    /// User input must be blocked until further notice.
    BlockUserInput {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// User input may resume.
    UnblockUserInput {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// A snapshot was durably written.
    SnapshotCreated {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The new snapshot.
        id: SnapshotId,
    },

    /// A snapshot replaced the live state.
    SnapshotRestored {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// The restored snapshot.
        id: SnapshotId,
    },

    /// Usage crossed into the warn band.
    MemoryWarn {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Budget at classification time.
        budget: Budget,
    },

    /// Usage crossed into the critical band.
    MemoryCritical {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Budget at classification time.
        budget: Budget,
    },

    /// Usage crossed into the emergency band.
    MemoryEmergency {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Budget at classification time.
        budget: Budget,
    },

    /// Device free memory dropped below the low-water mark.
    LowMemory {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Free device bytes at probe time.
        free_bytes: u64,
        /// Total device bytes.
        total_bytes: u64,
    },

    /// The live state was replaced with a compacted seed.
    Rollover {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// Snapshot written immediately before the rollover.
        new_snapshot_id: SnapshotId,
    },

    /// The pool was resized.
    ContextResized {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
        /// New pool size in tokens.
        new_size: u64,
    },

    /// Configuration was validated and applied.
    ConfigUpdated {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },

    /// Messages and checkpoints were dropped, keeping the system prompt.
    Cleared {
        /// Common fields.
        #[serde(flatten)]
        base: BaseEvent,
    },
}

impl EngineEvent {
    /// The common fields of any event.
    #[must_use]
    pub fn base(&self) -> &BaseEvent {
        match self {
            Self::Started { base }
            | Self::Stopped { base }
            | Self::MessageAdded { base, .. }
            | Self::CompressionStarted { base }
            | Self::CompressionCompleted { base, .. }
            | Self::CompressionSkipped { base, .. }
            | Self::BlockUserInput { base }
            | Self::UnblockUserInput { base }
            | Self::SnapshotCreated { base, .. }
            | Self::SnapshotRestored { base, .. }
            | Self::MemoryWarn { base, .. }
            | Self::MemoryCritical { base, .. }
            | Self::MemoryEmergency { base, .. }
            | Self::LowMemory { base, .. }
            | Self::Rollover { base, .. }
            | Self::ContextResized { base, .. }
            | Self::ConfigUpdated { base }
            | Self::Cleared { base } => base,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
