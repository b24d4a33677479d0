//! Checkpoint lifecycle: creation, aging, merging, absorption planning.
//!
//! [`CheckpointManager`] owns the policy around the checkpoint sequence but
//! no state; it operates on slices passed in and returns new sequences,
//! which the conversation state validates and applies. This keeps ownership
//! a DAG: state is mutated in exactly one place.
//!
//! ## Aging
//!
//! Every completed compression pass increments the `compression_count` of
//! the checkpoints that survived it. Past fixed counts a checkpoint's
//! summary is re-rendered at the next level down: Moderate keeps the key
//! decisions, Compact keeps a single line and drops them. Token counts are
//! re-measured after every rewrite; the stale figure is discarded.

use chrono::{DateTime, Utc};
use tracing::debug;

use ember_core::constants::CHARS_PER_TOKEN;
use ember_core::{Checkpoint, CheckpointId, CheckpointLevel, Message};
use ember_tokens::TokenCounter;

use crate::summarizer::ExtractedFacts;

/// The span a compression pass will absorb.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbsorptionPlan {
    /// Number of oldest live messages to absorb.
    pub absorb_len: usize,
    /// Sequence number of the first absorbed message.
    pub first_seq: u64,
    /// Sequence number of the last absorbed message.
    pub last_seq: u64,
    /// Token sum of the absorbed messages.
    pub absorbed_tokens: u64,
}

/// Checkpoint policy: absorption planning, aging, merging, the cap.
#[derive(Clone, Copy, Debug)]
pub struct CheckpointManager {
    cap: usize,
}

impl CheckpointManager {
    /// Create a manager with the given checkpoint cap.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    /// The configured cap.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    // ── Absorption planning ─────────────────────────────────────────────

    /// Choose which messages a pass absorbs, given a preserve budget.
    ///
    /// Walks newest to oldest accumulating cached token counts, stopping
    /// once the accumulator reaches `preserve_recent_tokens`; everything
    /// older is the absorption range. Returns `None` when the range would
    /// be empty (recent messages alone exceed the budget), so the pass must
    /// skip rather than summarize content the caller wants verbatim.
    #[must_use]
    pub fn plan_absorption(
        messages: &[Message],
        preserve_recent_tokens: u64,
    ) -> Option<AbsorptionPlan> {
        let mut preserved = 0u64;
        for i in (0..messages.len()).rev() {
            preserved += messages[i].tokens();
            if preserved >= preserve_recent_tokens {
                if i == 0 {
                    return None;
                }
                let absorbed = &messages[..i];
                return Some(AbsorptionPlan {
                    absorb_len: i,
                    first_seq: absorbed[0].seq,
                    last_seq: absorbed[i - 1].seq,
                    absorbed_tokens: absorbed.iter().map(Message::tokens).sum(),
                });
            }
        }
        None
    }

    // ── Creation ────────────────────────────────────────────────────────

    /// Build the Detailed checkpoint for an executed plan.
    ///
    /// `measured_tokens` is the re-measured count of `summary_text`; the
    /// summarizer's own estimate is advisory only.
    #[must_use]
    pub fn build_checkpoint(
        plan: &AbsorptionPlan,
        summary_text: String,
        facts: ExtractedFacts,
        measured_tokens: u32,
        now: DateTime<Utc>,
    ) -> Checkpoint {
        Checkpoint {
            id: CheckpointId::new(),
            level: CheckpointLevel::Detailed,
            range: (plan.first_seq, plan.last_seq),
            summary: Message::system(summary_text, now).with_token_count(measured_tokens),
            original_tokens: plan.absorbed_tokens,
            current_tokens: u64::from(measured_tokens),
            compression_count: 0,
            created_at: now,
            last_aged_at: None,
            key_decisions: facts.key_decisions,
            files_modified: facts.files_modified,
            next_steps: facts.next_steps,
        }
    }

    // ── Pass survival & aging ───────────────────────────────────────────

    /// Clone `checkpoints` with pass counts bumped for the survivors.
    ///
    /// `skip_newest` excludes the checkpoint created by the pass itself, which
    /// it has survived nothing yet.
    #[must_use]
    pub fn survive_pass(checkpoints: &[Checkpoint], skip_newest: bool) -> Vec<Checkpoint> {
        let last = checkpoints.len().saturating_sub(1);
        checkpoints
            .iter()
            .enumerate()
            .map(|(i, cp)| {
                let mut cp = cp.clone();
                if !(skip_newest && i == last) {
                    cp.compression_count += 1;
                }
                cp
            })
            .collect()
    }

    /// Walk the sequence oldest-first and re-render any checkpoint due for
    /// its next level. Token counts are re-measured; levels only move down.
    #[must_use]
    pub fn age(
        checkpoints: Vec<Checkpoint>,
        counter: &TokenCounter,
        now: DateTime<Utc>,
    ) -> Vec<Checkpoint> {
        checkpoints
            .into_iter()
            .map(|cp| {
                if cp.is_due_for_aging() {
                    age_one(cp, counter, now)
                } else {
                    cp
                }
            })
            .collect()
    }

    /// Coalesce the `k` oldest checkpoints into one Compact summary whose
    /// range spans their union, keeping one line per merged checkpoint so
    /// the fact that the work happened survives.
    #[must_use]
    pub fn merge_oldest(
        checkpoints: Vec<Checkpoint>,
        k: usize,
        counter: &TokenCounter,
        now: DateTime<Utc>,
    ) -> Vec<Checkpoint> {
        if k < 2 || checkpoints.len() < k {
            return checkpoints;
        }
        let (oldest, rest) = checkpoints.split_at(k);

        let mut lines = vec![format!("Merged history ({k} checkpoints):")];
        for cp in oldest {
            let first_line = cp.summary.content.lines().next().unwrap_or("");
            lines.push(format!(
                "- seq {}-{}: {}",
                cp.first_seq(),
                cp.last_seq(),
                clip(first_line, 60)
            ));
        }
        let text = lines.join("\n");
        let measured = counter.count(&text);

        let mut files = Vec::new();
        for cp in oldest {
            for file in &cp.files_modified {
                if !files.contains(file) {
                    files.push(file.clone());
                }
            }
        }

        let merged = Checkpoint {
            id: CheckpointId::new(),
            level: CheckpointLevel::Compact,
            range: (oldest[0].first_seq(), oldest[k - 1].last_seq()),
            summary: Message::system(text, now).with_token_count(measured),
            original_tokens: oldest.iter().map(|c| c.original_tokens).sum(),
            current_tokens: u64::from(measured),
            compression_count: oldest
                .iter()
                .map(|c| c.compression_count)
                .max()
                .unwrap_or(0),
            created_at: oldest[0].created_at,
            last_aged_at: Some(now),
            key_decisions: Vec::new(),
            files_modified: files,
            next_steps: Vec::new(),
        };

        debug!(merged = k, remaining = rest.len() + 1, "merged oldest checkpoints");
        let mut out = Vec::with_capacity(rest.len() + 1);
        out.push(merged);
        out.extend_from_slice(rest);
        out
    }

    /// Merge as needed so the sequence fits under the cap.
    #[must_use]
    pub fn enforce_cap(
        &self,
        checkpoints: Vec<Checkpoint>,
        counter: &TokenCounter,
        now: DateTime<Utc>,
    ) -> Vec<Checkpoint> {
        if checkpoints.len() <= self.cap {
            return checkpoints;
        }
        // k oldest collapse into one, leaving exactly `cap` entries.
        let k = checkpoints.len() - self.cap + 1;
        Self::merge_oldest(checkpoints, k, counter, now)
    }

    /// Sum of current summary tokens.
    #[must_use]
    pub fn total_tokens(checkpoints: &[Checkpoint]) -> u64 {
        checkpoints.iter().map(|c| c.current_tokens).sum()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aging renderers
// ─────────────────────────────────────────────────────────────────────────────

/// Re-render one due checkpoint at its next level.
fn age_one(cp: Checkpoint, counter: &TokenCounter, now: DateTime<Utc>) -> Checkpoint {
    let to = cp.level.aged();
    let text = match to {
        CheckpointLevel::Moderate => render_moderate(&cp),
        CheckpointLevel::Compact | CheckpointLevel::Detailed => render_compact(&cp),
    };
    let measured = counter.count(&text);
    debug!(
        checkpoint = %cp.id,
        from = ?cp.level,
        to = ?to,
        tokens_before = cp.current_tokens,
        tokens_after = measured,
        "checkpoint aged"
    );
    Checkpoint {
        summary: Message::system(text, now).with_token_count(measured),
        level: to,
        current_tokens: u64::from(measured),
        last_aged_at: Some(now),
        key_decisions: if to == CheckpointLevel::Compact {
            Vec::new()
        } else {
            cp.key_decisions.clone()
        },
        ..cp
    }
}

/// Moderate rendering: trimmed narrative, key decisions intact.
fn render_moderate(cp: &Checkpoint) -> String {
    let budget = CheckpointLevel::Moderate.target_tokens() as usize * CHARS_PER_TOKEN as usize;
    let decisions = if cp.key_decisions.is_empty() {
        String::new()
    } else {
        format!("\nDecisions: {}", cp.key_decisions.join("; "))
    };
    let narrative_budget = budget.saturating_sub(decisions.len()).max(40);
    format!("{}{decisions}", clip(&cp.summary.content, narrative_budget))
}

/// Compact rendering: a single ultra-brief line; decisions dropped.
fn render_compact(cp: &Checkpoint) -> String {
    let budget = CheckpointLevel::Compact.target_tokens() as usize * CHARS_PER_TOKEN as usize;
    let first_line = cp.summary.content.lines().next().unwrap_or("");
    format!(
        "[seq {}-{}] {}",
        cp.first_seq(),
        cp.last_seq(),
        clip(first_line, budget.saturating_sub(16).max(24))
    )
}

/// Char-boundary-safe clip with ellipsis.
fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
