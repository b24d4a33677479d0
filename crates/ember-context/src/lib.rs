//! # ember-context
//!
//! Checkpointing, compression orchestration, threshold dispatch, and the
//! public context façade.
//!
//! - **Checkpoint manager**: creates, ages, and merges hierarchical summary
//!   checkpoints; selects absorption ranges under a preserve-recent budget
//! - **Compression coordinator**: runs the compression state machine under
//!   the session exclusion lock, with summarizer timeout and truncation
//!   fallback, and the inflation guard
//! - **Memory guard**: classifies every pre-send into warn / compress /
//!   emergency / rollover
//! - **Context manager**: the façade that owns the conversation state and
//!   wires counting, pooling, snapshots, and events together

#![deny(unsafe_code)]

pub mod checkpoints;
pub mod coordinator;
pub mod guard;
pub mod manager;
pub mod preprocessor;
pub mod summarizer;
pub mod types;

pub use checkpoints::{AbsorptionPlan, CheckpointManager};
pub use coordinator::{CompressionCoordinator, PreSnapshot};
pub use guard::MemoryGuard;
pub use manager::{ContextManager, ManagerConfig};
pub use preprocessor::{InputPreprocessor, PreprocessedInput};
pub use summarizer::{
    serialize_messages, ExtractedFacts, ExtractiveSummarizer, SummaryOutput, Summarizer,
    SummarizerError,
};
pub use types::{
    CompressionOutcome, CompressionStrategy, GuardAction, PromptBundle, TokenReport,
};
