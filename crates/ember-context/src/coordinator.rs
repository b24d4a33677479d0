//! Compression pass orchestration.
//!
//! [`CompressionCoordinator`] owns the session-wide exclusion lock and runs
//! the pass state machine:
//!
//! ```text
//! Idle → Acquiring → Snapshotting → Absorbing → Summarizing
//!      → Truncating (fallback) → Aging → Accounting → Idle
//! ```
//!
//! The lock is an `AtomicBool` acquired with `compare_exchange`; an RAII
//! guard releases it, notifies waiters, and emits `unblock_user_input` on
//! every exit path: normal return, error, and future cancellation alike.
//!
//! The summarizer call carries a hard deadline; expiry falls through to the
//! deterministic truncation path, which cannot fail. The inflation guard
//! measures the summary after the summarizer returns and discards the whole
//! pass, with no state change, if it would grow the token count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use ember_core::constants::DETAILED_TARGET_TOKENS;
use ember_core::{Clock, ConversationState, EmberError, Message, Result};
use ember_events::{BaseEvent, CompressionSkipReason, EngineEvent, EventBus};
use ember_snapshots::{SnapshotMetadata, SnapshotStore};
use ember_tokens::TokenCounter;

use crate::checkpoints::CheckpointManager;
use crate::summarizer::{ExtractiveSummarizer, Summarizer};
use crate::types::{CompressionOutcome, CompressionStrategy};

/// Instruction handed to the summarizer for checkpoint creation.
const SUMMARIZE_INSTRUCTION: &str = "Summarize this conversation segment for a context \
     checkpoint. Preserve the current goal, key decisions with their reasons, files \
     modified, and open next steps.";

/// Best-effort snapshot taken before a pass mutates anything.
pub struct PreSnapshot<'a> {
    /// Store to write through.
    pub store: &'a SnapshotStore,
    /// Metadata captured with the snapshot.
    pub metadata: SnapshotMetadata,
    /// Listing summary for the snapshot.
    pub summary: String,
}

/// Session-scoped compression orchestrator.
pub struct CompressionCoordinator {
    is_compressing: AtomicBool,
    done: Notify,
    summarizer_timeout: Duration,
}

/// RAII guard: releases the lock, notifies waiters, unblocks input.
/// Runs on normal completion, error, and future cancellation.
struct PassGuard<'a> {
    is_compressing: &'a AtomicBool,
    done: &'a Notify,
    bus: &'a EventBus,
    session_id: String,
    clock: &'a dyn Clock,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.is_compressing.store(false, Ordering::SeqCst);
        self.bus.emit(EngineEvent::UnblockUserInput {
            base: BaseEvent::at(self.session_id.clone(), self.clock.now()),
        });
        self.done.notify_waiters();
    }
}

impl CompressionCoordinator {
    /// Create a coordinator with the given summarizer deadline.
    #[must_use]
    pub fn new(summarizer_timeout: Duration) -> Self {
        Self {
            is_compressing: AtomicBool::new(false),
            done: Notify::new(),
            summarizer_timeout,
        }
    }

    /// Whether a pass currently holds the exclusion lock.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.is_compressing.load(Ordering::SeqCst)
    }

    /// Wait for a running pass to finish.
    ///
    /// Returns `true` if idle within `timeout` (immediately when nothing is
    /// running).
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_busy() {
            let notified = self.done.notified();
            if !self.is_busy() {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !self.is_busy();
            }
        }
        true
    }

    /// Run one compression pass.
    ///
    /// Returns [`EmberError::Busy`] without queuing when a pass is already
    /// running. On success the outcome reports what changed; a skipped pass
    /// (`skipped: true`) changed nothing.
    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    pub async fn compress(
        &self,
        state: &mut ConversationState,
        counter: &TokenCounter,
        checkpoints: &CheckpointManager,
        summarizer: &dyn Summarizer,
        strategy: CompressionStrategy,
        preserve_recent_tokens: u64,
        pre_snapshot: Option<PreSnapshot<'_>>,
        bus: &EventBus,
        clock: &dyn Clock,
    ) -> Result<CompressionOutcome> {
        // ── Acquiring ───────────────────────────────────────────────────
        if self
            .is_compressing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EmberError::Busy {
                operation: "compress",
            });
        }
        let session_id = state.session_id().clone();
        let _guard = PassGuard {
            is_compressing: &self.is_compressing,
            done: &self.done,
            bus,
            session_id: session_id.clone().into_inner(),
            clock,
        };

        bus.emit(EngineEvent::CompressionStarted {
            base: BaseEvent::at(session_id.as_str(), clock.now()),
        });
        bus.emit(EngineEvent::BlockUserInput {
            base: BaseEvent::at(session_id.as_str(), clock.now()),
        });
        debug!(
            session_id = %session_id,
            ?strategy,
            preserve_recent_tokens,
            token_total = state.token_total(),
            "compression pass starting"
        );

        // ── Snapshotting (best-effort) ──────────────────────────────────
        if let Some(pre) = pre_snapshot {
            match pre
                .store
                .save(state, pre.metadata, pre.summary, clock.now())
            {
                Ok(id) => bus.emit(EngineEvent::SnapshotCreated {
                    base: BaseEvent::at(session_id.as_str(), clock.now()),
                    id,
                }),
                Err(e) => {
                    warn!(error = %e, "pre-compression snapshot failed, proceeding");
                }
            }
        }

        // ── Absorbing ───────────────────────────────────────────────────
        let Some(plan) =
            CheckpointManager::plan_absorption(state.messages(), preserve_recent_tokens)
        else {
            debug!("nothing to absorb under the preserve budget, skipping pass");
            bus.emit(EngineEvent::CompressionSkipped {
                base: BaseEvent::at(session_id.as_str(), clock.now()),
                reason: CompressionSkipReason::NothingToAbsorb,
            });
            return Ok(CompressionOutcome::skipped(strategy, false));
        };
        let absorbed: Vec<Message> = state.messages()[..plan.absorb_len].to_vec();

        // ── Summarizing / Truncating ────────────────────────────────────
        let (output, strategy_used) = match strategy {
            CompressionStrategy::Truncate => (
                ExtractiveSummarizer::extract(&absorbed, DETAILED_TARGET_TOKENS),
                CompressionStrategy::Truncate,
            ),
            CompressionStrategy::Summarize | CompressionStrategy::Hybrid => {
                let call = summarizer.summarize(
                    &absorbed,
                    DETAILED_TARGET_TOKENS,
                    SUMMARIZE_INSTRUCTION,
                );
                match tokio::time::timeout(self.summarizer_timeout, call).await {
                    Ok(Ok(output)) => (output, strategy),
                    Ok(Err(e)) => {
                        warn!(error = %e, "summarizer failed, truncating instead");
                        (
                            ExtractiveSummarizer::extract(&absorbed, DETAILED_TARGET_TOKENS),
                            CompressionStrategy::Truncate,
                        )
                    }
                    Err(_) => {
                        warn!(
                            timeout_ms = self.summarizer_timeout.as_millis() as u64,
                            "summarizer deadline expired, truncating instead"
                        );
                        (
                            ExtractiveSummarizer::extract(&absorbed, DETAILED_TARGET_TOKENS),
                            CompressionStrategy::Truncate,
                        )
                    }
                }
            }
        };

        // ── Inflation guard ─────────────────────────────────────────────
        let measured = counter.count(&output.text);
        if u64::from(measured) > plan.absorbed_tokens {
            info!(
                summary_tokens = measured,
                absorbed_tokens = plan.absorbed_tokens,
                "summary would inflate the context, discarding pass"
            );
            bus.emit(EngineEvent::CompressionSkipped {
                base: BaseEvent::at(session_id.as_str(), clock.now()),
                reason: CompressionSkipReason::Inflated,
            });
            return Ok(CompressionOutcome {
                strategy_used,
                original_tokens: plan.absorbed_tokens,
                compressed_tokens: u64::from(measured),
                ratio: 1.0,
                checkpoint_created: None,
                inflated: true,
                skipped: true,
            });
        }

        // ── Mutation ────────────────────────────────────────────────────
        let checkpoint = CheckpointManager::build_checkpoint(
            &plan,
            output.text,
            output.facts,
            measured,
            clock.now(),
        );
        let checkpoint_id = checkpoint.id.clone();
        state.absorb(checkpoint, plan.absorb_len)?;

        // ── Aging ───────────────────────────────────────────────────────
        let survived = CheckpointManager::survive_pass(state.checkpoints(), true);
        let aged = CheckpointManager::age(survived, counter, clock.now());
        let capped = checkpoints.enforce_cap(aged, counter, clock.now());
        state.replace_checkpoints(capped)?;

        // ── Accounting ──────────────────────────────────────────────────
        state.check_invariant()?;
        #[allow(clippy::cast_precision_loss)]
        let ratio = if plan.absorbed_tokens > 0 {
            u64::from(measured) as f64 / plan.absorbed_tokens as f64
        } else {
            1.0
        };

        info!(
            session_id = %session_id,
            original_tokens = plan.absorbed_tokens,
            compressed_tokens = measured,
            ratio,
            checkpoint = %checkpoint_id,
            token_total = state.token_total(),
            "compression pass complete"
        );
        bus.emit(EngineEvent::CompressionCompleted {
            base: BaseEvent::at(session_id.as_str(), clock.now()),
            ratio,
        });

        Ok(CompressionOutcome {
            strategy_used,
            original_tokens: plan.absorbed_tokens,
            compressed_tokens: u64::from(measured),
            ratio,
            checkpoint_created: Some(checkpoint_id),
            inflated: false,
            skipped: false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use ember_core::{FixedClock, SessionId};

    use crate::summarizer::{SummaryOutput, SummarizerError};

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    /// Summarizer returning a fixed text.
    struct FixedSummarizer {
        text: String,
    }

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(
            &self,
            _messages: &[Message],
            _target_tokens: u32,
            _instruction: &str,
        ) -> std::result::Result<SummaryOutput, SummarizerError> {
            Ok(SummaryOutput {
                text: self.text.clone(),
                approximate_tokens: 0,
                facts: crate::summarizer::ExtractedFacts::default(),
            })
        }
    }

    /// Summarizer that always fails.
    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _messages: &[Message],
            _target_tokens: u32,
            _instruction: &str,
        ) -> std::result::Result<SummaryOutput, SummarizerError> {
            Err(SummarizerError::CallFailed {
                message: "model unavailable".into(),
            })
        }
    }

    /// Summarizer that never returns.
    struct HangingSummarizer;

    #[async_trait]
    impl Summarizer for HangingSummarizer {
        async fn summarize(
            &self,
            _messages: &[Message],
            _target_tokens: u32,
            _instruction: &str,
        ) -> std::result::Result<SummaryOutput, SummarizerError> {
            futures::future::pending().await
        }
    }

    fn state_with_messages(n: u64, tokens_each: u32) -> ConversationState {
        let mut state = ConversationState::new(
            SessionId::from("sess-1"),
            Message::system("prompt", epoch()).with_token_count(10),
        );
        for i in 0..n {
            let _ = state.push_message(
                Message::user(format!("message {i} {}", "x".repeat(tokens_each as usize * 4)), epoch())
                    .with_token_count(tokens_each),
            );
        }
        state
    }

    fn fixture() -> (TokenCounter, CheckpointManager, EventBus, FixedClock) {
        (
            TokenCounter::new("llama3:8b"),
            CheckpointManager::new(10),
            EventBus::new(),
            FixedClock::default(),
        )
    }

    // -- happy path --

    #[tokio::test]
    async fn hybrid_pass_creates_checkpoint_and_preserves_recent() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut rx = bus.subscribe();
        let mut state = state_with_messages(6, 150);
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));
        let summarizer = FixedSummarizer {
            text: "short summary".into(),
        };

        let outcome = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &summarizer,
                CompressionStrategy::Hybrid,
                200,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();

        assert!(!outcome.skipped);
        assert_eq!(outcome.strategy_used, CompressionStrategy::Hybrid);
        assert_eq!(outcome.original_tokens, 600);
        assert!(outcome.compressed_tokens < 600);
        assert!(outcome.checkpoint_created.is_some());

        assert_eq!(state.checkpoints().len(), 1);
        assert_eq!(state.messages().len(), 2);
        state.check_invariant().unwrap();

        // event order: started, block, completed, unblock
        assert_matches!(rx.try_recv().unwrap(), EngineEvent::CompressionStarted { .. });
        assert_matches!(rx.try_recv().unwrap(), EngineEvent::BlockUserInput { .. });
        assert_matches!(
            rx.try_recv().unwrap(),
            EngineEvent::CompressionCompleted { .. }
        );
        assert_matches!(rx.try_recv().unwrap(), EngineEvent::UnblockUserInput { .. });
    }

    #[tokio::test]
    async fn truncate_strategy_never_calls_summarizer() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut state = state_with_messages(6, 100);
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));

        // a hanging summarizer proves it is not consulted
        let outcome = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &HangingSummarizer,
                CompressionStrategy::Truncate,
                150,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();

        assert_eq!(outcome.strategy_used, CompressionStrategy::Truncate);
        assert!(!outcome.skipped);
        assert_eq!(state.checkpoints().len(), 1);
    }

    // -- fallbacks --

    #[tokio::test]
    async fn summarizer_failure_falls_through_to_truncation() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut state = state_with_messages(6, 100);
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));

        let outcome = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &FailingSummarizer,
                CompressionStrategy::Hybrid,
                150,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();

        assert_eq!(outcome.strategy_used, CompressionStrategy::Truncate);
        assert!(!outcome.skipped);
        assert_eq!(state.checkpoints().len(), 1);
        state.check_invariant().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn summarizer_timeout_falls_through_to_truncation() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut state = state_with_messages(6, 100);
        let coordinator = CompressionCoordinator::new(Duration::from_millis(50));

        let outcome = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &HangingSummarizer,
                CompressionStrategy::Hybrid,
                150,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();

        assert_eq!(outcome.strategy_used, CompressionStrategy::Truncate);
        assert_eq!(state.checkpoints().len(), 1);
    }

    // -- skip paths --

    #[tokio::test]
    async fn skips_when_nothing_to_absorb() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut rx = bus.subscribe();
        // two messages, both within the preserve budget
        let mut state = state_with_messages(2, 50);
        let before = state.clone();
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));

        let outcome = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &FixedSummarizer { text: "s".into() },
                CompressionStrategy::Hybrid,
                1_000,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();

        assert!(outcome.skipped);
        assert!(!outcome.inflated);
        assert_eq!(state, before);

        // skipped event carries the reason
        let mut saw_skip = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::CompressionSkipped { reason, .. } = event {
                assert_eq!(reason, CompressionSkipReason::NothingToAbsorb);
                saw_skip = true;
            }
        }
        assert!(saw_skip);
    }

    #[tokio::test]
    async fn inflation_guard_discards_pass_without_state_change() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut rx = bus.subscribe();
        let mut state = state_with_messages(6, 10);
        let before = state.clone();
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));
        // summary far larger than the ~40 absorbed tokens
        let summarizer = FixedSummarizer {
            text: "inflated ".repeat(100),
        };

        let outcome = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &summarizer,
                CompressionStrategy::Hybrid,
                20,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();

        assert!(outcome.skipped);
        assert!(outcome.inflated);
        assert!(outcome.compressed_tokens > outcome.original_tokens);
        assert_eq!(state, before);

        let mut saw_inflated = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::CompressionSkipped { reason, .. } = event {
                assert_eq!(reason, CompressionSkipReason::Inflated);
                saw_inflated = true;
            }
        }
        assert!(saw_inflated);
    }

    // -- exclusion --

    #[tokio::test]
    async fn concurrent_pass_returns_busy() {
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));
        // hold the lock by hand to simulate a running pass
        coordinator.is_compressing.store(true, Ordering::SeqCst);

        let (counter, ckpts, bus, clock) = fixture();
        let mut state = state_with_messages(6, 100);
        let err = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &FixedSummarizer { text: "s".into() },
                CompressionStrategy::Hybrid,
                150,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap_err();
        assert_matches!(err, EmberError::Busy { .. });
    }

    #[tokio::test]
    async fn lock_released_after_pass() {
        let (counter, ckpts, bus, clock) = fixture();
        let mut state = state_with_messages(6, 100);
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));
        let _ = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &FixedSummarizer { text: "s".into() },
                CompressionStrategy::Hybrid,
                150,
                None,
                &bus,
                &clock,
            )
            .await
            .unwrap();
        assert!(!coordinator.is_busy());
        assert!(coordinator.wait_until_idle(Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_idle_times_out_while_held() {
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));
        coordinator.is_compressing.store(true, Ordering::SeqCst);
        assert!(!coordinator.wait_until_idle(Duration::from_millis(100)).await);
        coordinator.is_compressing.store(false, Ordering::SeqCst);
        assert!(coordinator.wait_until_idle(Duration::from_millis(1)).await);
    }

    // -- pre-snapshot --

    #[tokio::test]
    async fn best_effort_snapshot_written_before_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let (counter, ckpts, bus, clock) = fixture();
        let mut state = state_with_messages(6, 100);
        let session = state.session_id().clone();
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));

        let _ = coordinator
            .compress(
                &mut state,
                &counter,
                &ckpts,
                &FixedSummarizer { text: "s".into() },
                CompressionStrategy::Hybrid,
                150,
                Some(PreSnapshot {
                    store: &store,
                    metadata: SnapshotMetadata {
                        model_name: "llama3:8b".into(),
                        pool_size: 8_192,
                        last_compression_ratio: None,
                    },
                    summary: "pre-compression".into(),
                }),
                &bus,
                &clock,
            )
            .await
            .unwrap();

        let listed = store.list(&session);
        assert_eq!(listed.len(), 1);
        // the snapshot captured the uncompressed state
        let snapshot = store.load(&session, &listed[0].id).unwrap();
        assert_eq!(snapshot.checkpoints.len(), 0);
        assert_eq!(snapshot.messages.len(), 7);
    }

    // -- aging across passes --

    #[tokio::test]
    async fn repeated_passes_age_oldest_checkpoints() {
        let (counter, ckpts, bus, clock) = fixture();
        let coordinator = CompressionCoordinator::new(Duration::from_secs(30));
        let mut state = state_with_messages(4, 100);

        for round in 0..7u64 {
            // top the conversation back up, then compress
            for i in 0..4 {
                let _ = state.push_message(
                    Message::user(format!("round {round} msg {i}"), epoch())
                        .with_token_count(100),
                );
            }
            let outcome = coordinator
                .compress(
                    &mut state,
                    &counter,
                    &ckpts,
                    &FixedSummarizer { text: format!("summary {round}") },
                    CompressionStrategy::Hybrid,
                    150,
                    None,
                    &bus,
                    &clock,
                )
                .await
                .unwrap();
            assert!(!outcome.skipped);
        }

        let oldest = &state.checkpoints()[0];
        assert!(oldest.compression_count >= 5);
        assert!(oldest.level <= ember_core::CheckpointLevel::Moderate);
        state.check_invariant().unwrap();

        // levels never increase along the sequence age ordering
        for cp in state.checkpoints() {
            assert!(cp.level >= ember_core::CheckpointLevel::Compact);
        }
    }
}
