//! End-to-end engine scenarios driven through the public façade.

use std::sync::Arc;

use async_trait::async_trait;

use ember_context::{
    CompressionStrategy, ContextManager, ExtractiveSummarizer, ManagerConfig, SummaryOutput,
    Summarizer, SummarizerError,
};
use ember_core::{
    CheckpointLevel, FixedClock, Message, PoolConfig, SessionId, ThresholdLevel,
};
use ember_events::{CompressionSkipReason, EngineEvent};
use ember_settings::EmberSettings;

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

/// Summarizer returning a fixed text, for steering compression outcomes.
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
    ) -> Result<SummaryOutput, SummarizerError> {
        Ok(SummaryOutput {
            text: self.text.clone(),
            approximate_tokens: (self.text.len() / 4) as u32,
            facts: ember_context::ExtractedFacts::default(),
        })
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    manager: ContextManager,
}

/// Build an engine with a fixed pool, a system prompt of
/// `system_tokens`, and the given summarizer.
fn harness(
    pool: u64,
    system_tokens: u32,
    summarizer: Arc<dyn Summarizer>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = EmberSettings::default();
    settings.pool.auto_size = false;
    settings.pool.min_tokens = 64;
    settings.pool.max_tokens = 1_000_000;
    settings.pool.target_tokens = pool;
    settings.compression.preserve_recent_tokens = 200;
    settings.compression.emergency_preserve_recent_tokens = 50;

    let manager = ContextManager::new(
        ManagerConfig {
            session_id: SessionId::new(),
            model: "llama3:8b".into(),
            system_prompt: "s".repeat(system_tokens as usize * 4),
            data_dir: dir.path().to_path_buf(),
            settings,
        },
        summarizer,
        None,
        Arc::new(FixedClock::default()),
    )
    .unwrap();
    Harness { _dir: dir, manager }
}

fn user(tokens: u32) -> Message {
    Message::user("u".repeat(tokens as usize * 4), chrono::DateTime::UNIX_EPOCH)
        .with_token_count(tokens)
}

fn assistant(tokens: u32) -> Message {
    Message::assistant("a".repeat(tokens as usize * 4), chrono::DateTime::UNIX_EPOCH)
        .with_token_count(tokens)
}

// ─────────────────────────────────────────────────────────────────────────────
// S1: simple append under budget
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s1_simple_append_under_budget() {
    let mut h = harness(8_192, 50, Arc::new(ExtractiveSummarizer::new()));
    let mut rx = h.manager.subscribe();

    let _ = h
        .manager
        .add_message(Message::user("hello", chrono::DateTime::UNIX_EPOCH))
        .unwrap();
    let _ = h.manager.add_message(assistant(100)).unwrap();

    // "hello" estimates to 2 tokens
    assert_eq!(h.manager.state().token_total(), 152);
    assert_eq!(h.manager.current_budget().level(), ThresholdLevel::Normal);
    assert!(h.manager.state().checkpoints().is_empty());

    let mut added = 0;
    let mut other = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::MessageAdded { .. } => added += 1,
            _ => other += 1,
        }
    }
    assert_eq!(added, 2);
    assert_eq!(other, 0, "no events besides message_added");
}

// ─────────────────────────────────────────────────────────────────────────────
// S2: crossing the warn threshold
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s2_warn_threshold_emits_once() {
    // 1-token system prompt; appended messages bring the total to 701
    let mut h = harness(1_000, 1, Arc::new(ExtractiveSummarizer::new()));
    let mut rx = h.manager.subscribe();

    let _ = h.manager.add_message(user(300)).unwrap(); // 301
    let _ = h.manager.add_message(assistant(300)).unwrap(); // 601
    let _ = h.manager.add_message(user(100)).unwrap(); // 701, crosses 0.70

    assert_eq!(h.manager.state().token_total(), 701);

    let mut warns = 0;
    let mut compressions = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::MemoryWarn { .. } => warns += 1,
            EngineEvent::CompressionStarted { .. } => compressions += 1,
            _ => {}
        }
    }
    assert_eq!(warns, 1, "memory_warn exactly once");
    assert_eq!(compressions, 0, "no compression at warn");
}

// ─────────────────────────────────────────────────────────────────────────────
// S3: critical triggers a Hybrid pass
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s3_critical_triggers_hybrid_compression() {
    let h = harness(
        1_000,
        10,
        Arc::new(FixedSummarizer {
            text: "Earlier discussion summarized briefly.".into(),
        }),
    );
    let mut manager = h.manager;
    for _ in 0..6 {
        let _ = manager.add_message(user(150)).unwrap();
    }
    // 10 + 900 = 910 → critical band
    assert_eq!(manager.current_budget().level(), ThresholdLevel::Critical);

    let mut rx = manager.subscribe();
    let before_total = manager.state().token_total();
    let bundle = manager.validate_and_build_prompt("go").await.unwrap();

    // a Detailed checkpoint now stands in for the absorbed range
    assert_eq!(manager.state().checkpoints().len(), 1);
    let checkpoint = &manager.state().checkpoints()[0];
    assert_eq!(checkpoint.level, CheckpointLevel::Detailed);
    assert!(checkpoint.current_tokens <= 600);
    assert_eq!(checkpoint.range, (1, 4));

    // the pass brought the total down and under the pool
    assert!(manager.state().token_total() < before_total);
    assert!(manager.state().token_total() < 1_000);
    manager.state().check_invariant().unwrap();

    // events: started → (blocked) → completed → unblocked
    let mut order = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::CompressionStarted { .. } => order.push("started"),
            EngineEvent::BlockUserInput { .. } => order.push("block"),
            EngineEvent::CompressionCompleted { .. } => order.push("completed"),
            EngineEvent::UnblockUserInput { .. } => order.push("unblock"),
            _ => {}
        }
    }
    assert_eq!(order, vec!["started", "block", "completed", "unblock"]);

    // the bundle carries the checkpoint as a system message
    assert_eq!(bundle.checkpoints.len(), 1);
    assert_eq!(bundle.user_message.content, "go");
}

// ─────────────────────────────────────────────────────────────────────────────
// S4: inflation guard
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s4_inflation_guard_discards_pass() {
    // summarizer output far exceeds the absorbed range
    let h = harness(
        1_000,
        10,
        Arc::new(FixedSummarizer {
            text: "inflated output ".repeat(400),
        }),
    );
    let mut manager = h.manager;
    for _ in 0..6 {
        let _ = manager.add_message(user(150)).unwrap();
    }
    let before = manager.state().clone();

    let mut rx = manager.subscribe();
    let outcome = manager
        .compress(CompressionStrategy::Hybrid, 200)
        .await
        .unwrap();

    assert!(outcome.skipped);
    assert!(outcome.inflated);
    assert_eq!(manager.state(), &before, "no state change on inflation");

    let mut saw_skip = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::CompressionSkipped { reason, .. } = event {
            assert_eq!(reason, CompressionSkipReason::Inflated);
            saw_skip = true;
        }
    }
    assert!(saw_skip);
}

// ─────────────────────────────────────────────────────────────────────────────
// S5: emergency rollover
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s5_emergency_rollover_preserves_recoverability() {
    let h = harness(16_384, 50, Arc::new(ExtractiveSummarizer::new()));
    let mut manager = h.manager;
    for i in 0..20 {
        let msg = if i % 2 == 0 { user(200) } else { assistant(200) };
        let _ = manager.add_message(msg).unwrap();
    }
    // 50 + 4000; shrink the pool under the live total via update_config
    manager
        .update_config(PoolConfig {
            auto_size: false,
            min_tokens: 64,
            max_tokens: 1_000_000,
            target_tokens: 3_000,
            ..PoolConfig::default()
        })
        .await
        .unwrap();
    assert!(manager.current_budget().fraction_used >= 1.0);

    let pre_rollover = manager.state().clone();
    let mut rx = manager.subscribe();
    let _ = manager.validate_and_build_prompt("still there?").await.unwrap();

    // a snapshot id arrived on the rollover event
    let mut rollover_id = None;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::Rollover { new_snapshot_id, .. } = event {
            rollover_id = Some(new_snapshot_id);
        }
    }
    let rollover_id = rollover_id.expect("rollover event with snapshot id");

    // fresh state: same system prompt identity, one compact synopsis
    // checkpoint, trailing user messages, within the pool
    let state = manager.state();
    assert_eq!(state.system_prompt().id, pre_rollover.system_prompt().id);
    assert_eq!(state.checkpoints().len(), 1);
    let seed = &state.checkpoints()[0];
    assert_eq!(seed.level, CheckpointLevel::Compact);
    assert!(seed.current_tokens <= 400);
    let carried_users = state.messages().iter().filter(|m| m.is_user()).count();
    assert!(carried_users >= 10, "ten carried plus the new turn");
    assert!(state.token_total() <= 3_000);

    // the written snapshot reproduces the pre-rollover state
    manager.restore_snapshot(&rollover_id).await.unwrap();
    assert_eq!(manager.state(), &pre_rollover);
}

// ─────────────────────────────────────────────────────────────────────────────
// S6: aging over many compressions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s6_aging_over_twelve_passes() {
    let h = harness(
        1_000_000,
        10,
        Arc::new(FixedSummarizer {
            text: "pass summary".into(),
        }),
    );
    let mut manager = h.manager;

    let mut observed_levels: std::collections::HashMap<ember_core::CheckpointId, CheckpointLevel> =
        std::collections::HashMap::new();

    for round in 0..12 {
        // force absorption each pass: refill, then compress
        for _ in 0..4 {
            let _ = manager.add_message(user(100)).unwrap();
        }
        let outcome = manager
            .compress(CompressionStrategy::Hybrid, 150)
            .await
            .unwrap();
        assert!(!outcome.skipped, "round {round} must absorb");

        // invariant 4: a surviving checkpoint never un-ages
        for cp in manager.state().checkpoints() {
            if let Some(prev) = observed_levels.get(&cp.id) {
                assert!(cp.level <= *prev, "checkpoint {} un-aged", cp.id);
            }
            let _ = observed_levels.insert(cp.id.clone(), cp.level);
        }

        // invariant 3: ranges stay a contiguous prefix partition
        manager.state().check_invariant().unwrap();
    }

    let checkpoints = manager.state().checkpoints();
    assert!(checkpoints.len() <= 10, "cap enforced");
    for cp in checkpoints {
        if cp.compression_count >= 10 {
            assert_eq!(cp.level, CheckpointLevel::Compact);
        } else if cp.compression_count >= 5 {
            assert!(cp.level <= CheckpointLevel::Moderate);
        }
    }
    // the oldest checkpoints have demonstrably aged
    assert!(checkpoints
        .iter()
        .any(|cp| cp.level < CheckpointLevel::Detailed));
}
