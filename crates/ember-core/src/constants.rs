//! Engine-wide constants.
//!
//! Shared constants for token estimation, threshold classification,
//! checkpoint aging, and compression timeouts.

// =============================================================================
// Token Estimation
// =============================================================================

/// Approximate characters per token for the fallback estimator.
pub const CHARS_PER_TOKEN: u32 = 4;

/// Token overhead added per tool-call wrapper (JSON schema envelope).
pub const TOOL_CALL_OVERHEAD_TOKENS: u32 = 50;

// =============================================================================
// Input Preprocessing
// =============================================================================

/// Maximum character length for a user message before truncation.
pub const USER_INPUT_MAX_CHARS: usize = 100_000;

/// Maximum character length for a tool result before truncation.
pub const TOOL_RESULT_MAX_CHARS: usize = 100_000;

// =============================================================================
// Threshold Classification
// =============================================================================

/// Context usage threshold fractions for the pre-send state machine.
pub struct Thresholds;

impl Thresholds {
    /// 70% — warn the UI, proceed.
    pub const WARN: f64 = 0.70;
    /// 80% — request Hybrid compression before proceeding.
    pub const CRITICAL: f64 = 0.80;
    /// 95% — aggressive compression; rollover if still over.
    pub const EMERGENCY: f64 = 0.95;
    /// 100% — unconditional rollover.
    pub const OVERFLOW: f64 = 1.00;
}

// =============================================================================
// Checkpoint Aging
// =============================================================================

/// Compression count at which a Detailed checkpoint ages to Moderate.
pub const DETAILED_AGE_COUNT: u32 = 5;

/// Compression count at which a Moderate checkpoint ages to Compact.
pub const MODERATE_AGE_COUNT: u32 = 10;

/// Nominal summary token target for a Detailed checkpoint.
pub const DETAILED_TARGET_TOKENS: u32 = 800;

/// Nominal summary token target for a Moderate checkpoint.
pub const MODERATE_TARGET_TOKENS: u32 = 300;

/// Nominal summary token target for a Compact checkpoint.
pub const COMPACT_TARGET_TOKENS: u32 = 80;

/// Default maximum number of live checkpoints before the oldest are merged.
pub const CHECKPOINT_CAP: usize = 10;

// =============================================================================
// Compression & Locking
// =============================================================================

/// Hard ceiling on a single summarizer call (milliseconds).
pub const SUMMARIZER_TIMEOUT_MS: u64 = 30_000;

/// Ceiling on waiting for the exclusion lock before `Blocked(timeout)`.
pub const LOCK_WAIT_TIMEOUT_MS: u64 = 30_000;

// =============================================================================
// Rollover
// =============================================================================

/// Token target for the synopsis checkpoint seeded into a fresh context.
pub const ROLLOVER_SYNOPSIS_TOKENS: u32 = 400;

/// Number of trailing user messages carried across a rollover.
pub const ROLLOVER_RECENT_USER_MESSAGES: usize = 10;

// =============================================================================
// Tests
// =============================================================================
