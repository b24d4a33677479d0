//! Derived budget view and threshold classification.
//!
//! [`Budget`] is a point-in-time reading of pool usage, recomputed on demand
//! and never stored. [`ThresholdLevel`] classifies the usage fraction into
//! the pre-send state machine's bands.

use serde::{Deserialize, Serialize};

use crate::constants::Thresholds;

// ─────────────────────────────────────────────────────────────────────────────
// ThresholdLevel
// ─────────────────────────────────────────────────────────────────────────────

/// Context usage threshold level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdLevel {
    /// Under 70% usage — proceed.
    Normal,
    /// 70–80% usage — warn the UI, proceed.
    Warn,
    /// 80–95% usage — compress before proceeding.
    Critical,
    /// 95–100% usage — aggressive compression, rollover if still over.
    Emergency,
    /// At or past 100% — unconditional rollover.
    Overflow,
}

impl ThresholdLevel {
    /// Classify a usage fraction.
    #[must_use]
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= Thresholds::OVERFLOW {
            Self::Overflow
        } else if ratio >= Thresholds::EMERGENCY {
            Self::Emergency
        } else if ratio >= Thresholds::CRITICAL {
            Self::Critical
        } else if ratio >= Thresholds::WARN {
            Self::Warn
        } else {
            Self::Normal
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Budget
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time pool usage. Derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// The token ceiling the session must respect.
    pub pool_size: u64,
    /// Tokens currently accounted in the conversation.
    pub used: u64,
    /// Tokens remaining (saturating).
    pub free: u64,
    /// `used / pool_size`; zero when the pool is unsized.
    pub fraction_used: f64,
}

impl Budget {
    /// Derive a budget from the pool size and current token total.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn derive(pool_size: u64, used: u64) -> Self {
        let fraction_used = if pool_size > 0 {
            used as f64 / pool_size as f64
        } else {
            0.0
        };
        Self {
            pool_size,
            used,
            free: pool_size.saturating_sub(used),
            fraction_used,
        }
    }

    /// The threshold band this budget falls in.
    #[must_use]
    pub fn level(&self) -> ThresholdLevel {
        ThresholdLevel::from_ratio(self.fraction_used)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
