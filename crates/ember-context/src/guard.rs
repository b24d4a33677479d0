//! Pre-send threshold dispatch.
//!
//! [`MemoryGuard`] is the pure gatekeeper: it maps a budget reading onto
//! exactly one action. It never errors and holds no state; escalation on
//! failed compression (Critical → Emergency → Overflow) is driven by the
//! façade, which re-evaluates after each step.

use ember_core::{Budget, ThresholdLevel};

use crate::types::GuardAction;

/// Threshold gatekeeper.
#[derive(Clone, Copy, Debug)]
pub struct MemoryGuard {
    preserve_recent_tokens: u64,
    emergency_preserve_recent_tokens: u64,
}

impl MemoryGuard {
    /// Create a guard with the two preserve budgets.
    #[must_use]
    pub fn new(preserve_recent_tokens: u64, emergency_preserve_recent_tokens: u64) -> Self {
        Self {
            preserve_recent_tokens,
            emergency_preserve_recent_tokens,
        }
    }

    /// Map a budget onto the single action for its threshold band.
    #[must_use]
    pub fn evaluate(&self, budget: &Budget) -> GuardAction {
        match budget.level() {
            ThresholdLevel::Normal => GuardAction::Proceed,
            ThresholdLevel::Warn => GuardAction::Warn,
            ThresholdLevel::Critical => GuardAction::Compress {
                preserve_recent_tokens: self.preserve_recent_tokens,
            },
            ThresholdLevel::Emergency => GuardAction::EmergencyCompress {
                preserve_recent_tokens: self.emergency_preserve_recent_tokens,
            },
            ThresholdLevel::Overflow => GuardAction::Rollover,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
