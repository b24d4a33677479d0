//! # ember-core
//!
//! Foundation types, errors, branded IDs, and the conversation model for the
//! ember engine.
//!
//! This crate provides the shared vocabulary that all other ember crates
//! depend on:
//!
//! - **Branded IDs**: `SessionId`, `MessageId`, `CheckpointId`, `SnapshotId`
//!   as newtypes for type safety
//! - **Messages**: plain-text `Message` records with role, timestamps, and a
//!   cached token count
//! - **Checkpoints**: hierarchical summary records with aging levels
//! - **Conversation state**: the token-accounted session state with its
//!   closure invariant
//! - **Pool config**: the token budget configuration derived from device
//!   memory
//! - **Errors**: `EmberError` hierarchy via `thiserror`
//! - **Clock**: injectable time source for deterministic tests

#![deny(unsafe_code)]

pub mod budget;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod constants;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod messages;

pub use budget::{Budget, ThresholdLevel};
pub use checkpoint::{Checkpoint, CheckpointLevel};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{KvQuantization, PoolConfig};
pub use conversation::ConversationState;
pub use errors::{CorruptReason, EmberError, Result};
pub use ids::{CheckpointId, MessageId, SessionId, SnapshotId};
pub use messages::{Message, Role};
