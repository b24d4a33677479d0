//! Token-accounted conversation state.
//!
//! [`ConversationState`] owns the system prompt, the ordered checkpoint
//! sequence, and the live message tail for one session. Every mutation keeps
//! the accounting equation closed:
//!
//! ```text
//! token_total == tokens(system_prompt)
//!              + Σ checkpoints.current_tokens
//!              + Σ messages.token_count
//! ```
//!
//! Mutations validate their inputs before touching state, so a rejected
//! mutation leaves the state untouched; [`ConversationState::check_invariant`]
//! re-verifies the equation and the checkpoint partition afterwards.
//!
//! Sequence numbers start at 1 and are assigned on append. The system prompt
//! never consumes one. Absorbing messages into a checkpoint removes them from
//! the live list, but their sequence range lives on in the covering
//! checkpoint, which is how the "ranges cover a contiguous prefix" property
//! stays checkable after compression.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::errors::{EmberError, Result};
use crate::ids::SessionId;
use crate::messages::{Message, Role};

/// The complete in-memory state of one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    session_id: SessionId,
    system_prompt: Message,
    checkpoints: Vec<Checkpoint>,
    messages: Vec<Message>,
    token_total: u64,
    next_seq: u64,
}

impl ConversationState {
    /// Create a fresh state holding only the system prompt.
    ///
    /// The prompt should already carry its token count; an uncounted prompt
    /// contributes zero until re-counted by the façade.
    #[must_use]
    pub fn new(session_id: SessionId, system_prompt: Message) -> Self {
        let token_total = system_prompt.tokens();
        Self {
            session_id,
            system_prompt,
            checkpoints: Vec::new(),
            messages: Vec::new(),
            token_total,
            next_seq: 1,
        }
    }

    /// Rebuild a state from restored parts (snapshot load).
    ///
    /// Recomputes `token_total` and `next_seq` from the payload and verifies
    /// the full invariant before returning.
    pub fn from_parts(
        session_id: SessionId,
        system_prompt: Message,
        checkpoints: Vec<Checkpoint>,
        messages: Vec<Message>,
    ) -> Result<Self> {
        let last_covered = checkpoints.last().map_or(0, Checkpoint::last_seq);
        let last_live = messages.last().map_or(0, |m| m.seq);
        let mut state = Self {
            session_id,
            system_prompt,
            checkpoints,
            messages,
            token_total: 0,
            next_seq: last_covered.max(last_live) + 1,
        };
        state.recompute_token_total();
        state.check_invariant()?;
        Ok(state)
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// The owning session.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// The standing system prompt.
    #[must_use]
    pub fn system_prompt(&self) -> &Message {
        &self.system_prompt
    }

    /// The ordered checkpoint sequence, oldest first.
    #[must_use]
    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// The live message tail, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Current accounted token total.
    #[must_use]
    pub fn token_total(&self) -> u64 {
        self.token_total
    }

    /// The sequence number the next appended message will receive.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sum of live message tokens (excludes system prompt and checkpoints).
    #[must_use]
    pub fn message_tokens(&self) -> u64 {
        self.messages.iter().map(Message::tokens).sum()
    }

    /// Sum of checkpoint summary tokens.
    #[must_use]
    pub fn checkpoint_tokens(&self) -> u64 {
        self.checkpoints.iter().map(|c| c.current_tokens).sum()
    }

    /// The trailing `n` user messages, in conversation order.
    #[must_use]
    pub fn last_user_messages(&self, n: usize) -> Vec<Message> {
        let mut recent: Vec<Message> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.is_user())
            .take(n)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// Append a message, assigning its sequence number.
    ///
    /// The message must carry its token count already; the façade counts
    /// before appending. Returns the assigned sequence number.
    pub fn push_message(&mut self, mut message: Message) -> u64 {
        debug_assert!(
            message.token_count.is_some(),
            "messages must be counted before entering the state"
        );
        message.seq = self.next_seq;
        self.next_seq += 1;
        self.token_total += message.tokens();
        let seq = message.seq;
        self.messages.push(message);
        seq
    }

    /// Replace the system prompt (the only operation allowed to).
    pub fn set_system_prompt(&mut self, prompt: Message) -> Result<()> {
        if prompt.role != Role::System {
            return Err(EmberError::Invariant {
                detail: format!("system prompt must have role system, got {:?}", prompt.role),
            });
        }
        self.token_total = self.token_total - self.system_prompt.tokens() + prompt.tokens();
        self.system_prompt = prompt;
        Ok(())
    }

    /// Absorb the oldest `absorbed_len` live messages into `checkpoint`.
    ///
    /// The checkpoint's range must exactly match the sequence span of the
    /// absorbed messages, and must butt up against the previous checkpoint.
    /// Validation happens before any mutation; the state is untouched on
    /// error.
    pub fn absorb(&mut self, checkpoint: Checkpoint, absorbed_len: usize) -> Result<()> {
        if absorbed_len == 0 || absorbed_len > self.messages.len() {
            return Err(EmberError::Invariant {
                detail: format!(
                    "absorb length {absorbed_len} out of bounds for {} live messages",
                    self.messages.len()
                ),
            });
        }
        let first = self.messages[0].seq;
        let last = self.messages[absorbed_len - 1].seq;
        if checkpoint.range != (first, last) {
            return Err(EmberError::Invariant {
                detail: format!(
                    "checkpoint range {:?} does not match absorbed span ({first}, {last})",
                    checkpoint.range
                ),
            });
        }
        if let Some(prev) = self.checkpoints.last() {
            if checkpoint.first_seq() != prev.last_seq() + 1 {
                return Err(EmberError::Invariant {
                    detail: format!(
                        "checkpoint range {:?} leaves a gap after previous range {:?}",
                        checkpoint.range, prev.range
                    ),
                });
            }
        }

        self.messages.drain(..absorbed_len);
        self.checkpoints.push(checkpoint);
        self.recompute_token_total();
        self.check_invariant()
    }

    /// Replace the checkpoint sequence after aging or merging.
    ///
    /// The replacement must cover exactly the same overall span as the
    /// current sequence. Validation happens before mutation.
    pub fn replace_checkpoints(&mut self, replacement: Vec<Checkpoint>) -> Result<()> {
        let current_span = self.covered_span();
        let replacement_span = match (replacement.first(), replacement.last()) {
            (Some(first), Some(last)) => Some((first.first_seq(), last.last_seq())),
            _ => None,
        };
        if current_span != replacement_span {
            return Err(EmberError::Invariant {
                detail: format!(
                    "replacement span {replacement_span:?} does not cover current span {current_span:?}"
                ),
            });
        }

        self.checkpoints = replacement;
        self.recompute_token_total();
        self.check_invariant()
    }

    /// Install the single seed checkpoint of a rollover state.
    ///
    /// Only valid on a state that has no checkpoints and no live messages;
    /// subsequent appends continue after the seeded range.
    pub fn install_seed_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()> {
        if !self.checkpoints.is_empty() || !self.messages.is_empty() {
            return Err(EmberError::Invariant {
                detail: "seed checkpoint requires an empty state".into(),
            });
        }
        if checkpoint.first_seq() != 1 {
            return Err(EmberError::Invariant {
                detail: format!(
                    "seed checkpoint must start at seq 1, got {}",
                    checkpoint.first_seq()
                ),
            });
        }
        self.next_seq = checkpoint.last_seq() + 1;
        self.checkpoints.push(checkpoint);
        self.recompute_token_total();
        self.check_invariant()
    }

    /// Drop all messages and checkpoints, keeping the system prompt.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.checkpoints.clear();
        self.next_seq = 1;
        self.recompute_token_total();
    }

    /// Re-derive `token_total` from the parts.
    pub fn recompute_token_total(&mut self) {
        self.token_total =
            self.system_prompt.tokens() + self.checkpoint_tokens() + self.message_tokens();
    }

    // ── Invariants ──────────────────────────────────────────────────────

    /// The overall `(first, last)` span the checkpoint sequence covers.
    #[must_use]
    pub fn covered_span(&self) -> Option<(u64, u64)> {
        match (self.checkpoints.first(), self.checkpoints.last()) {
            (Some(first), Some(last)) => Some((first.first_seq(), last.last_seq())),
            _ => None,
        }
    }

    /// Verify the accounting equation and the checkpoint partition.
    pub fn check_invariant(&self) -> Result<()> {
        let computed =
            self.system_prompt.tokens() + self.checkpoint_tokens() + self.message_tokens();
        if computed != self.token_total {
            return Err(EmberError::Invariant {
                detail: format!(
                    "token total {} != computed {computed}",
                    self.token_total
                ),
            });
        }

        // Ranges ordered, non-overlapping, gap-free, covering a prefix.
        let mut expected_next = 1u64;
        for cp in &self.checkpoints {
            if cp.first_seq() != expected_next {
                return Err(EmberError::Invariant {
                    detail: format!(
                        "checkpoint range {:?} breaks prefix continuity at seq {expected_next}",
                        cp.range
                    ),
                });
            }
            if cp.last_seq() < cp.first_seq() {
                return Err(EmberError::Invariant {
                    detail: format!("checkpoint range {:?} is inverted", cp.range),
                });
            }
            expected_next = cp.last_seq() + 1;
        }

        // Live messages sit strictly after the covered prefix, in order.
        let mut prev_seq = expected_next.saturating_sub(1);
        for msg in &self.messages {
            if msg.seq <= prev_seq {
                return Err(EmberError::Invariant {
                    detail: format!(
                        "message seq {} out of order after {prev_seq}",
                        msg.seq
                    ),
                });
            }
            prev_seq = msg.seq;
        }

        if self.system_prompt.role != Role::System {
            return Err(EmberError::Invariant {
                detail: "system prompt lost its system role".into(),
            });
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
