//! Context subsystem types.
//!
//! Shared records for compression strategies and outcomes, guard actions,
//! the assembled prompt bundle, and the token breakdown report.

use serde::{Deserialize, Serialize};

use ember_core::{CheckpointId, Message, ThresholdLevel};

// =============================================================================
// Compression
// =============================================================================

/// How a compression pass reduces the absorbed range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    /// Summarize the absorbed range with the external summarizer.
    Summarize,
    /// Deterministic extraction only; never calls the summarizer.
    Truncate,
    /// Summarize, preserving a recent-token budget verbatim; falls back to
    /// truncation on summarizer failure.
    #[default]
    Hybrid,
}

/// Result of one compression pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionOutcome {
    /// Strategy that actually ran (Hybrid reports Truncate when it fell
    /// back).
    pub strategy_used: CompressionStrategy,
    /// Tokens of the absorbed range before the pass.
    pub original_tokens: u64,
    /// Tokens of the summary that replaced it.
    pub compressed_tokens: u64,
    /// `compressed_tokens / original_tokens` (1.0 when skipped).
    pub ratio: f64,
    /// Checkpoint created by the pass, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_created: Option<CheckpointId>,
    /// The pass was discarded because the summary would have grown the
    /// count.
    pub inflated: bool,
    /// The pass made no state change.
    pub skipped: bool,
}

impl CompressionOutcome {
    /// An outcome for a pass that changed nothing.
    #[must_use]
    pub fn skipped(strategy: CompressionStrategy, inflated: bool) -> Self {
        Self {
            strategy_used: strategy,
            original_tokens: 0,
            compressed_tokens: 0,
            ratio: 1.0,
            checkpoint_created: None,
            inflated,
            skipped: true,
        }
    }
}

// =============================================================================
// Guard actions
// =============================================================================

/// What the pre-send gatekeeper decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardAction {
    /// Under the warn band: proceed.
    Proceed,
    /// Warn band: tell the UI, proceed.
    Warn,
    /// Critical band: run a Hybrid pass, then proceed.
    Compress {
        /// Recent tokens preserved verbatim.
        preserve_recent_tokens: u64,
    },
    /// Emergency band: aggressive pass; rollover if still over.
    EmergencyCompress {
        /// Smaller preserve budget for the aggressive pass.
        preserve_recent_tokens: u64,
    },
    /// Overflow: rollover unconditionally.
    Rollover,
}

// =============================================================================
// Prompt bundle
// =============================================================================

/// The exact sequence the provider will receive.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptBundle {
    /// The standing system prompt.
    pub system_prompt: Message,
    /// Checkpoint summaries, as system messages, oldest first.
    pub checkpoints: Vec<Message>,
    /// Live conversation messages (not including the new user message).
    pub messages: Vec<Message>,
    /// The user message being sent.
    pub user_message: Message,
}

impl PromptBundle {
    /// Flatten into the ordered provider message list.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        let mut out =
            Vec::with_capacity(2 + self.checkpoints.len() + self.messages.len());
        out.push(self.system_prompt);
        out.extend(self.checkpoints);
        out.extend(self.messages);
        out.push(self.user_message);
        out
    }
}

// =============================================================================
// Token report
// =============================================================================

/// Per-component token breakdown for UI display.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReport {
    /// System prompt tokens.
    pub system_prompt: u64,
    /// Sum of checkpoint summary tokens.
    pub checkpoints: u64,
    /// Sum of live message tokens.
    pub messages: u64,
    /// Accounted total (equals the sum of the above).
    pub total: u64,
    /// Pool ceiling.
    pub pool_size: u64,
    /// `total / pool_size`.
    pub fraction_used: f64,
    /// Threshold band of the current usage.
    pub threshold_level: ThresholdLevel,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use ember_core::Role;

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    // -- CompressionStrategy --

    #[test]
    fn default_strategy_is_hybrid() {
        assert_eq!(CompressionStrategy::default(), CompressionStrategy::Hybrid);
    }

    #[test]
    fn strategy_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&CompressionStrategy::Hybrid).unwrap(),
            "\"hybrid\""
        );
    }

    // -- CompressionOutcome --

    #[test]
    fn skipped_outcome_shape() {
        let outcome = CompressionOutcome::skipped(CompressionStrategy::Hybrid, true);
        assert!(outcome.skipped);
        assert!(outcome.inflated);
        assert!((outcome.ratio - 1.0).abs() < f64::EPSILON);
        assert!(outcome.checkpoint_created.is_none());
    }

    #[test]
    fn outcome_serde_camel_case() {
        let outcome = CompressionOutcome {
            strategy_used: CompressionStrategy::Truncate,
            original_tokens: 900,
            compressed_tokens: 90,
            ratio: 0.1,
            checkpoint_created: Some(CheckpointId::from("cp-1")),
            inflated: false,
            skipped: false,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["strategyUsed"], "truncate");
        assert_eq!(json["originalTokens"], 900);
        assert_eq!(json["checkpointCreated"], "cp-1");
    }

    // -- PromptBundle --

    #[test]
    fn bundle_flattens_in_provider_order() {
        let bundle = PromptBundle {
            system_prompt: Message::system("sys", epoch()),
            checkpoints: vec![Message::system("cp", epoch())],
            messages: vec![
                Message::user("old", epoch()),
                Message::assistant("reply", epoch()),
            ],
            user_message: Message::user("new", epoch()),
        };
        let flat = bundle.into_messages();
        assert_eq!(flat.len(), 5);
        assert_eq!(flat[0].role, Role::System);
        assert_eq!(flat[1].content, "cp");
        assert_eq!(flat[4].content, "new");
    }
}
