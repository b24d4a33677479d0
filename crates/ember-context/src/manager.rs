//! The public context façade.
//!
//! [`ContextManager`] owns the [`ConversationState`] for one session and
//! wires every other component together: token counting, pool sizing,
//! checkpointing, compression, snapshots, threshold dispatch, and the event
//! bus. Components never hold back-references; they receive the state they
//! need as arguments and answer with values or events, so ownership stays a
//! DAG.
//!
//! Suspension points are exactly the async methods
//! (`validate_and_build_prompt`, `compress`, `preview_compression`,
//! snapshot operations); `add_message`, `current_budget`, and the other
//! queries are synchronous and never block.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use ember_core::constants::{
    DETAILED_TARGET_TOKENS, LOCK_WAIT_TIMEOUT_MS, ROLLOVER_RECENT_USER_MESSAGES,
    ROLLOVER_SYNOPSIS_TOKENS,
};
use ember_core::{
    Budget, Checkpoint, CheckpointId, CheckpointLevel, Clock, ConversationState, EmberError,
    Message, PoolConfig, Result, SessionId, SnapshotId, ThresholdLevel,
};
use ember_device::{ContextPool, DeviceMemory};
use ember_events::{BaseEvent, EngineEvent, EventBus, EventReceiver};
use ember_settings::EmberSettings;
use ember_snapshots::{
    migrate_legacy_layout, IndexEntry, SessionLock, SnapshotMetadata, SnapshotStore,
};
use ember_tokens::{ProviderTokenizer, TokenCounter};

use crate::checkpoints::CheckpointManager;
use crate::coordinator::{CompressionCoordinator, PreSnapshot};
use crate::guard::MemoryGuard;
use crate::preprocessor::InputPreprocessor;
use crate::summarizer::{ExtractiveSummarizer, Summarizer};
use crate::types::{CompressionOutcome, CompressionStrategy, GuardAction, PromptBundle, TokenReport};

// =============================================================================
// Configuration
// =============================================================================

/// Construction parameters for the façade.
pub struct ManagerConfig {
    /// Session identity; also names the snapshot directory.
    pub session_id: SessionId,
    /// Model the session drives.
    pub model: String,
    /// Standing system prompt text.
    pub system_prompt: String,
    /// Data directory holding `context-snapshots/`.
    pub data_dir: PathBuf,
    /// Validated engine settings.
    pub settings: EmberSettings,
}

// =============================================================================
// ContextManager
// =============================================================================

/// Façade coordinating the full context engine for one session.
pub struct ContextManager {
    model: String,
    settings: EmberSettings,
    state: ConversationState,
    counter: TokenCounter,
    pool: ContextPool,
    checkpoints: CheckpointManager,
    coordinator: CompressionCoordinator,
    store: SnapshotStore,
    guard: MemoryGuard,
    preprocessor: InputPreprocessor,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    summarizer: Arc<dyn Summarizer>,
    last_compression_ratio: Option<f64>,
    last_level: ThresholdLevel,
    _session_lock: SessionLock,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager").finish_non_exhaustive()
    }
}

impl ContextManager {
    /// Bring up the engine for a session.
    ///
    /// Migrates any legacy snapshot layout, acquires the session lock
    /// (rejecting a second session with the same id), counts the system
    /// prompt, and emits `started`.
    pub fn new(
        config: ManagerConfig,
        summarizer: Arc<dyn Summarizer>,
        provider_tokenizer: Option<Arc<dyn ProviderTokenizer>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let ManagerConfig {
            session_id,
            model,
            system_prompt,
            data_dir,
            settings,
        } = config;
        settings
            .validate()
            .map_err(|e| EmberError::invalid_config(e.to_string()))?;

        let migrated = migrate_legacy_layout(&data_dir)?;
        if migrated > 0 {
            info!(migrated, "migrated legacy snapshot sessions");
        }
        let store = SnapshotStore::new(&data_dir);
        let session_lock = SessionLock::acquire(&store.root().join(session_id.as_str()))?;

        let mut counter = TokenCounter::new(model.clone())
            .with_multiplier(settings.pool.token_multiplier);
        if let Some(tokenizer) = provider_tokenizer {
            counter = counter.with_provider(tokenizer);
        }

        let mut prompt = Message::system(system_prompt, clock.now());
        let prompt_tokens = counter.count_message(&prompt);
        prompt.token_count = Some(prompt_tokens);
        let state = ConversationState::new(session_id.clone(), prompt);

        let pool = ContextPool::new(
            settings.pool.clone(),
            settings.device.model_params_billion,
        )?;
        let manager = Self {
            checkpoints: CheckpointManager::new(settings.compression.checkpoint_cap),
            coordinator: CompressionCoordinator::new(Duration::from_millis(
                settings.compression.summarizer_timeout_ms,
            )),
            guard: MemoryGuard::new(
                settings.compression.preserve_recent_tokens,
                settings.compression.emergency_preserve_recent_tokens,
            ),
            preprocessor: InputPreprocessor::default(),
            bus: EventBus::new(),
            clock,
            summarizer,
            last_compression_ratio: None,
            last_level: ThresholdLevel::Normal,
            _session_lock: session_lock,
            model,
            settings,
            state,
            counter,
            pool,
            store,
        };
        manager.bus.emit(EngineEvent::Started {
            base: manager.base(),
        });
        Ok(manager)
    }

    // ── Queries (never suspend) ─────────────────────────────────────────

    /// Subscribe to engine events.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// The session this engine serves.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.state.session_id()
    }

    /// The model in use.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Read access to the live conversation state.
    #[must_use]
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// The input size preprocessor (callers bound tool results with it).
    #[must_use]
    pub fn preprocessor(&self) -> &InputPreprocessor {
        &self.preprocessor
    }

    /// Current pool usage, derived on demand.
    #[must_use]
    pub fn current_budget(&self) -> Budget {
        Budget::derive(self.pool.size(), self.state.token_total())
    }

    /// Per-component token breakdown for UI display.
    #[must_use]
    pub fn token_report(&self) -> TokenReport {
        let budget = self.current_budget();
        TokenReport {
            system_prompt: self.state.system_prompt().tokens(),
            checkpoints: self.state.checkpoint_tokens(),
            messages: self.state.message_tokens(),
            total: self.state.token_total(),
            pool_size: budget.pool_size,
            fraction_used: budget.fraction_used,
            threshold_level: budget.level(),
        }
    }

    /// Whether a compression pass currently holds the exclusion lock.
    #[must_use]
    pub fn is_compressing(&self) -> bool {
        self.coordinator.is_busy()
    }

    // ── Message intake ──────────────────────────────────────────────────

    /// Append a message to the conversation.
    ///
    /// Counts it if it carries no cached count (the count is written once),
    /// updates the accounted total, emits `message_added`, and emits the
    /// threshold event when usage crosses into a higher band. Never
    /// suspends; compression triggered by a crossing runs on the next
    /// pre-send or explicit `compress`.
    pub fn add_message(&mut self, mut message: Message) -> Result<u64> {
        if message.token_count.is_none() {
            let tokens = self.counter.count_message(&message);
            message.token_count = Some(tokens);
        }
        let seq = self.state.push_message(message);
        self.state.check_invariant()?;

        let budget = self.current_budget();
        self.bus.emit(EngineEvent::MessageAdded {
            base: self.base(),
            budget,
        });
        self.note_threshold(budget);
        debug!(
            seq,
            token_total = self.state.token_total(),
            fraction_used = budget.fraction_used,
            "message added"
        );
        Ok(seq)
    }

    /// Replace the system prompt (the only operation allowed to).
    pub fn set_system_prompt(&mut self, text: impl Into<String>) -> Result<()> {
        let mut prompt = Message::system(text.into(), self.clock.now());
        let tokens = self.counter.count_message(&prompt);
        prompt.token_count = Some(tokens);
        self.state.set_system_prompt(prompt)?;
        self.state.check_invariant()
    }

    // ── The critical path ───────────────────────────────────────────────

    /// Validate the budget for a new user turn and assemble the exact
    /// message sequence the provider will receive.
    ///
    /// Waits out a running compression pass (30-second ceiling, then
    /// `Timeout`), classifies the projected usage, executes the resulting
    /// action ladder (warn / compress / emergency compress / rollover),
    /// re-evaluates, appends the user message, and returns the bundle.
    pub async fn validate_and_build_prompt(&mut self, user_text: &str) -> Result<PromptBundle> {
        if !self
            .coordinator
            .wait_until_idle(Duration::from_millis(LOCK_WAIT_TIMEOUT_MS))
            .await
        {
            return Err(EmberError::Timeout {
                operation: "validate_and_build_prompt",
                timeout_ms: LOCK_WAIT_TIMEOUT_MS,
            });
        }

        let prepared = self.preprocessor.prepare_user_input(user_text);
        if prepared.truncated {
            warn!(
                original_chars = prepared.original_chars,
                "oversized user input truncated before send"
            );
        }
        let mut user_message = Message::user(prepared.content, self.clock.now());
        let user_tokens = self.counter.count_message(&user_message);
        user_message.token_count = Some(user_tokens);

        self.resolve_budget_for_send(u64::from(user_tokens)).await?;

        // The send is within budget; the user message becomes part of the
        // conversation and the bundle reflects the exact provider input.
        let checkpoints: Vec<Message> = self
            .state
            .checkpoints()
            .iter()
            .map(|c| c.summary.clone())
            .collect();
        let messages = self.state.messages().to_vec();
        let _ = self.add_message(user_message.clone())?;
        let stored = self
            .state
            .messages()
            .last()
            .cloned()
            .unwrap_or(user_message);

        Ok(PromptBundle {
            system_prompt: self.state.system_prompt().clone(),
            checkpoints,
            messages,
            user_message: stored,
        })
    }

    /// Run the guard ladder until the projected send fits (or fail).
    async fn resolve_budget_for_send(&mut self, user_tokens: u64) -> Result<()> {
        let projected =
            |state: &ConversationState, pool: &ContextPool| -> Budget {
                Budget::derive(pool.size(), state.token_total() + user_tokens)
            };

        let budget = projected(&self.state, &self.pool);
        match self.guard.evaluate(&budget) {
            GuardAction::Proceed => return Ok(()),
            GuardAction::Warn => {
                self.note_threshold(budget);
                return Ok(());
            }
            GuardAction::Compress {
                preserve_recent_tokens,
            } => {
                self.note_threshold(budget);
                let outcome = self
                    .run_compress(CompressionStrategy::Hybrid, preserve_recent_tokens)
                    .await;
                if let Err(e) = &outcome {
                    warn!(error = %e, "compression at critical failed, escalating");
                }
            }
            GuardAction::EmergencyCompress { .. } | GuardAction::Rollover => {}
        }

        // Re-evaluate; escalate to the emergency pass when still at or
        // above the emergency band (or when the critical pass failed to
        // bring usage below critical).
        let budget = projected(&self.state, &self.pool);
        if budget.level() >= ThresholdLevel::Critical
            && budget.level() < ThresholdLevel::Overflow
        {
            self.note_threshold(budget);
            let preserve = self.settings.compression.emergency_preserve_recent_tokens;
            if let Err(e) = self
                .run_compress(CompressionStrategy::Hybrid, preserve)
                .await
            {
                warn!(error = %e, "emergency compression failed, escalating to rollover");
            }
        }

        // Final escalation: rollover when still at or above emergency.
        let budget = projected(&self.state, &self.pool);
        if budget.level() >= ThresholdLevel::Emergency {
            let _ = self.rollover().await?;
        }

        let budget = projected(&self.state, &self.pool);
        if budget.used > budget.pool_size {
            return Err(EmberError::BudgetExceeded {
                required: budget.used,
                available: budget.pool_size,
            });
        }
        Ok(())
    }

    // ── Compression ─────────────────────────────────────────────────────

    /// Run an explicit compression pass.
    pub async fn compress(
        &mut self,
        strategy: CompressionStrategy,
        preserve_recent_tokens: u64,
    ) -> Result<CompressionOutcome> {
        self.run_compress(strategy, preserve_recent_tokens).await
    }

    /// Run a pass with the configured preserve budget (the `/compress`
    /// command path).
    pub async fn compress_default(&mut self) -> Result<CompressionOutcome> {
        self.run_compress(
            CompressionStrategy::default(),
            self.settings.compression.preserve_recent_tokens,
        )
        .await
    }

    async fn run_compress(
        &mut self,
        strategy: CompressionStrategy,
        preserve_recent_tokens: u64,
    ) -> Result<CompressionOutcome> {
        let metadata = self.snapshot_metadata();
        let summarizer = Arc::clone(&self.summarizer);
        let pre_snapshot = self
            .settings
            .compression
            .snapshot_before_compress
            .then(|| PreSnapshot {
                store: &self.store,
                metadata,
                summary: "pre-compression".into(),
            });

        let outcome = self
            .coordinator
            .compress(
                &mut self.state,
                &self.counter,
                &self.checkpoints,
                summarizer.as_ref(),
                strategy,
                preserve_recent_tokens,
                pre_snapshot,
                &self.bus,
                self.clock.as_ref(),
            )
            .await?;

        if !outcome.skipped {
            self.last_compression_ratio = Some(outcome.ratio);
        }
        let _ = self
            .store
            .prune(self.state.session_id(), self.settings.snapshots.max_count)?;
        Ok(outcome)
    }

    /// Dry-run a pass: select the range and summarize, but mutate nothing.
    pub async fn preview_compression(
        &self,
        strategy: CompressionStrategy,
        preserve_recent_tokens: u64,
    ) -> Result<CompressionOutcome> {
        let Some(plan) =
            CheckpointManager::plan_absorption(self.state.messages(), preserve_recent_tokens)
        else {
            return Ok(CompressionOutcome::skipped(strategy, false));
        };
        let absorbed = &self.state.messages()[..plan.absorb_len];

        let (text, strategy_used) = match strategy {
            CompressionStrategy::Truncate => (
                ExtractiveSummarizer::extract(absorbed, DETAILED_TARGET_TOKENS).text,
                CompressionStrategy::Truncate,
            ),
            CompressionStrategy::Summarize | CompressionStrategy::Hybrid => {
                let call = self.summarizer.summarize(
                    absorbed,
                    DETAILED_TARGET_TOKENS,
                    "Preview the checkpoint summary for this segment.",
                );
                let timeout =
                    Duration::from_millis(self.settings.compression.summarizer_timeout_ms);
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(output)) => (output.text, strategy),
                    _ => (
                        ExtractiveSummarizer::extract(absorbed, DETAILED_TARGET_TOKENS).text,
                        CompressionStrategy::Truncate,
                    ),
                }
            }
        };

        let measured = u64::from(self.counter.count(&text));
        let inflated = measured > plan.absorbed_tokens;
        #[allow(clippy::cast_precision_loss)]
        let ratio = if plan.absorbed_tokens > 0 && !inflated {
            measured as f64 / plan.absorbed_tokens as f64
        } else {
            1.0
        };
        Ok(CompressionOutcome {
            strategy_used,
            original_tokens: plan.absorbed_tokens,
            compressed_tokens: measured,
            ratio,
            checkpoint_created: None,
            inflated,
            skipped: inflated,
        })
    }

    // ── Snapshots ───────────────────────────────────────────────────────

    /// Durably snapshot the current state.
    pub async fn create_snapshot(&mut self) -> Result<SnapshotId> {
        let id = self.store.save(
            &self.state,
            self.snapshot_metadata(),
            self.listing_summary(),
            self.clock.now(),
        )?;
        self.bus.emit(EngineEvent::SnapshotCreated {
            base: self.base(),
            id: id.clone(),
        });
        let _ = self
            .store
            .prune(self.state.session_id(), self.settings.snapshots.max_count)?;
        Ok(id)
    }

    /// Replace the live state with a stored snapshot.
    ///
    /// Rejected with `Busy` while a compression pass runs.
    pub async fn restore_snapshot(&mut self, id: &SnapshotId) -> Result<()> {
        if self.coordinator.is_busy() {
            return Err(EmberError::Busy {
                operation: "restore_snapshot",
            });
        }
        let restored = self.store.load_state(self.state.session_id(), id)?;
        self.state = restored;
        self.last_level = self.current_budget().level();
        self.bus.emit(EngineEvent::SnapshotRestored {
            base: self.base(),
            id: id.clone(),
        });
        info!(snapshot_id = %id, token_total = self.state.token_total(), "snapshot restored");
        Ok(())
    }

    /// List this session's snapshots from the index.
    #[must_use]
    pub fn list_snapshots(&self) -> Vec<IndexEntry> {
        self.store.list(self.state.session_id())
    }

    // ── Rollover ────────────────────────────────────────────────────────

    /// Snapshot, then replace the live state with a compacted seed: the
    /// same system prompt, one Compact synopsis checkpoint, and the last
    /// ten user messages.
    ///
    /// The snapshot write must succeed: a rollover that cannot preserve
    /// recoverability does not run.
    pub async fn rollover(&mut self) -> Result<SnapshotId> {
        let snapshot_id = self.store.save(
            &self.state,
            self.snapshot_metadata(),
            "pre-rollover",
            self.clock.now(),
        )?;

        let synopsis = self.build_synopsis();
        let synopsis_tokens = self.counter.count(&synopsis);
        let prior_last_seq = self.state.next_seq().saturating_sub(1).max(1);
        let absorbed_tokens =
            self.state.checkpoint_tokens() + self.state.message_tokens();
        let carried = self
            .state
            .last_user_messages(ROLLOVER_RECENT_USER_MESSAGES);

        let now = self.clock.now();
        let seed = Checkpoint {
            id: CheckpointId::new(),
            level: CheckpointLevel::Compact,
            range: (1, prior_last_seq),
            summary: Message::system(synopsis, now).with_token_count(synopsis_tokens),
            original_tokens: absorbed_tokens,
            current_tokens: u64::from(synopsis_tokens),
            compression_count: 0,
            created_at: now,
            last_aged_at: None,
            key_decisions: Vec::new(),
            files_modified: Vec::new(),
            next_steps: Vec::new(),
        };

        let mut fresh = ConversationState::new(
            self.state.session_id().clone(),
            self.state.system_prompt().clone(),
        );
        fresh.install_seed_checkpoint(seed)?;
        for message in carried {
            let _ = fresh.push_message(message);
        }
        fresh.check_invariant()?;
        self.state = fresh;
        self.last_level = self.current_budget().level();

        let _ = self
            .store
            .prune(self.state.session_id(), self.settings.snapshots.max_count)?;
        info!(
            snapshot_id = %snapshot_id,
            token_total = self.state.token_total(),
            "context rolled over"
        );
        self.bus.emit(EngineEvent::Rollover {
            base: self.base(),
            new_snapshot_id: snapshot_id.clone(),
        });
        Ok(snapshot_id)
    }

    // ── Configuration & pool ────────────────────────────────────────────

    /// Validate and apply a new pool configuration.
    ///
    /// Emits `config_updated`, and `context_resized` when the pool size
    /// changed. Shrinking below the live total is allowed here; the next
    /// pre-send resolves the overflow.
    pub async fn update_config(&mut self, config: PoolConfig) -> Result<()> {
        let before = self.pool.size();
        let new_size = self.pool.update_config(config.clone())?;
        self.counter.set_multiplier(config.token_multiplier);
        self.settings.pool = config;
        self.bus.emit(EngineEvent::ConfigUpdated { base: self.base() });
        if new_size != before {
            self.bus.emit(EngineEvent::ContextResized {
                base: self.base(),
                new_size,
            });
        }
        Ok(())
    }

    /// Resize the pool explicitly. Refuses to shrink below the live token
    /// total (compress first).
    pub fn resize_pool(&mut self, new_size: u64) -> Result<u64> {
        let applied = self.pool.resize(new_size, self.state.token_total())?;
        self.bus.emit(EngineEvent::ContextResized {
            base: self.base(),
            new_size: applied,
        });
        Ok(applied)
    }

    /// Re-derive the pool size from a device memory reading (auto mode).
    pub fn apply_device_reading(&mut self, reading: &DeviceMemory) -> Result<u64> {
        let target = self.pool.compute_size(reading);
        if target == self.pool.size() {
            return Ok(target);
        }
        self.resize_pool(target)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Drop all messages and checkpoints, keeping the system prompt.
    pub fn clear(&mut self) {
        self.state.clear();
        self.last_level = ThresholdLevel::Normal;
        self.bus.emit(EngineEvent::Cleared { base: self.base() });
    }

    /// Final snapshot attempt and `stopped`.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.create_snapshot().await {
            warn!(error = %e, "final snapshot failed during shutdown");
        }
        self.bus.emit(EngineEvent::Stopped { base: self.base() });
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn base(&self) -> BaseEvent {
        BaseEvent::at(self.state.session_id().as_str(), self.clock.now())
    }

    fn snapshot_metadata(&self) -> SnapshotMetadata {
        SnapshotMetadata {
            model_name: self.model.clone(),
            pool_size: self.pool.size(),
            last_compression_ratio: self.last_compression_ratio,
        }
    }

    /// Short description for snapshot listings.
    fn listing_summary(&self) -> String {
        self.state
            .messages()
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map_or_else(
                || "(empty conversation)".to_string(),
                |m| m.content.chars().take(80).collect(),
            )
    }

    /// Deterministic rollover synopsis: one line per checkpoint plus an
    /// extractive digest of the live tail, bounded by the synopsis budget.
    fn build_synopsis(&self) -> String {
        let mut lines = vec![format!(
            "Conversation compacted after {} absorbed and live messages.",
            self.state.next_seq().saturating_sub(1)
        )];
        for cp in self.state.checkpoints() {
            let first_line = cp.summary.content.lines().next().unwrap_or("");
            lines.push(format!(
                "- seq {}-{}: {}",
                cp.first_seq(),
                cp.last_seq(),
                first_line.chars().take(70).collect::<String>()
            ));
        }
        let remaining = ROLLOVER_SYNOPSIS_TOKENS.saturating_sub(
            u32::try_from(lines.iter().map(|l| l.len() / 4).sum::<usize>()).unwrap_or(u32::MAX),
        );
        if remaining > 16 && !self.state.messages().is_empty() {
            let digest = ExtractiveSummarizer::extract(self.state.messages(), remaining);
            lines.push(digest.text);
        }

        let budget_chars =
            ROLLOVER_SYNOPSIS_TOKENS as usize * ember_core::constants::CHARS_PER_TOKEN as usize;
        let text = lines.join("\n");
        if text.chars().count() <= budget_chars {
            text
        } else {
            text.chars().take(budget_chars).collect()
        }
    }

    /// Emit the matching memory event when usage crosses into a higher
    /// band; crossing back down re-arms the notification.
    fn note_threshold(&mut self, budget: Budget) {
        let level = budget.level();
        if level > self.last_level {
            match level {
                ThresholdLevel::Warn => self.bus.emit(EngineEvent::MemoryWarn {
                    base: self.base(),
                    budget,
                }),
                ThresholdLevel::Critical => self.bus.emit(EngineEvent::MemoryCritical {
                    base: self.base(),
                    budget,
                }),
                ThresholdLevel::Emergency | ThresholdLevel::Overflow => {
                    self.bus.emit(EngineEvent::MemoryEmergency {
                        base: self.base(),
                        budget,
                    });
                }
                ThresholdLevel::Normal => {}
            }
        }
        self.last_level = level;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
