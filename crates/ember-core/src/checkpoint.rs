//! Hierarchical summary checkpoints.
//!
//! A checkpoint is an additive, role=system summary message standing in for
//! a contiguous span of absorbed earlier messages. Checkpoints age: every
//! compression pass they survive increments `compression_count`, and past
//! fixed counts their level drops Detailed → Moderate → Compact, each with a
//! smaller summary budget. Key decisions survive the Detailed → Moderate
//! transition; Compact keeps only an ultra-brief line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    COMPACT_TARGET_TOKENS, DETAILED_AGE_COUNT, DETAILED_TARGET_TOKENS, MODERATE_AGE_COUNT,
    MODERATE_TARGET_TOKENS,
};
use crate::ids::CheckpointId;
use crate::messages::Message;

// ─────────────────────────────────────────────────────────────────────────────
// CheckpointLevel
// ─────────────────────────────────────────────────────────────────────────────

/// Compression level of a checkpoint. Aging only moves downward in detail
/// (numerically: 3 → 2 → 1), never back up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CheckpointLevel {
    /// Ultra-brief single line; decisions dropped.
    Compact = 1,
    /// Shorter narrative; key decisions retained.
    Moderate = 2,
    /// Full narrative summary, as first written.
    Detailed = 3,
}

impl CheckpointLevel {
    /// Nominal summary token budget for this level. The summarizer is asked
    /// to fit within it; actual counts are re-measured afterwards.
    #[must_use]
    pub fn target_tokens(self) -> u32 {
        match self {
            Self::Detailed => DETAILED_TARGET_TOKENS,
            Self::Moderate => MODERATE_TARGET_TOKENS,
            Self::Compact => COMPACT_TARGET_TOKENS,
        }
    }

    /// The level this one ages into (Compact is terminal).
    #[must_use]
    pub fn aged(self) -> Self {
        match self {
            Self::Detailed => Self::Moderate,
            Self::Moderate | Self::Compact => Self::Compact,
        }
    }
}

impl From<CheckpointLevel> for u8 {
    fn from(level: CheckpointLevel) -> Self {
        level as Self
    }
}

impl TryFrom<u8> for CheckpointLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Compact),
            2 => Ok(Self::Moderate),
            3 => Ok(Self::Detailed),
            other => Err(format!("invalid checkpoint level {other}")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkpoint
// ─────────────────────────────────────────────────────────────────────────────

/// A summary standing in for an absorbed, contiguous message span.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Stable identity.
    pub id: CheckpointId,
    /// Current aging level.
    pub level: CheckpointLevel,
    /// Inclusive `(first_msg_seq, last_msg_seq)` of the absorbed span.
    pub range: (u64, u64),
    /// The summary itself, a role=system message.
    pub summary: Message,
    /// Token count of the absorbed messages at creation time.
    pub original_tokens: u64,
    /// Token count of the current summary (re-measured after every aging).
    pub current_tokens: u64,
    /// Number of compression passes this checkpoint has survived.
    pub compression_count: u32,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
    /// When the checkpoint last aged, if ever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_aged_at: Option<DateTime<Utc>>,
    /// Decisions worth preserving through Moderate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_decisions: Vec<String>,
    /// Files touched in the absorbed span.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<String>,
    /// Work items still open when the span was absorbed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
}

impl Checkpoint {
    /// First absorbed sequence number.
    #[must_use]
    pub fn first_seq(&self) -> u64 {
        self.range.0
    }

    /// Last absorbed sequence number.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.range.1
    }

    /// Whether this checkpoint's level should age given its pass count.
    #[must_use]
    pub fn is_due_for_aging(&self) -> bool {
        match self.level {
            CheckpointLevel::Detailed => self.compression_count >= DETAILED_AGE_COUNT,
            CheckpointLevel::Moderate => self.compression_count >= MODERATE_AGE_COUNT,
            CheckpointLevel::Compact => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
