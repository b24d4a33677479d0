//! The on-disk snapshot record.
//!
//! Top-level keys are snake_case and fixed by the file format; nested
//! messages and checkpoints use their own wire shapes. Only an exact
//! `schema_version` match is loadable; forward-compatible readers are
//! explicitly out of scope for v1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ember_core::{
    Checkpoint, ConversationState, CorruptReason, EmberError, Message, Result, SessionId,
    SnapshotId,
};

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Fields a file must carry to be considered a snapshot at all.
const REQUIRED_FIELDS: [&str; 5] = ["schema_version", "id", "session_id", "created_at", "messages"];

/// Session metadata captured alongside the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Model the session was driving.
    pub model_name: String,
    /// Pool size at capture time.
    pub pool_size: u64,
    /// Ratio of the most recent compression pass, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_compression_ratio: Option<f64>,
}

/// A full recoverable record of one [`ConversationState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Schema version; only an exact match loads.
    pub schema_version: u32,
    /// Snapshot identity (UUID v7, time-ordered).
    pub id: SnapshotId,
    /// Owning session.
    pub session_id: SessionId,
    /// Capture instant.
    pub created_at: DateTime<Utc>,
    /// Accounted token total at capture time.
    pub token_count: u64,
    /// Short human description for listings.
    pub summary: String,
    /// Full ordered message list; the system prompt is first.
    pub messages: Vec<Message>,
    /// Full checkpoint sequence.
    pub checkpoints: Vec<Checkpoint>,
    /// Session metadata.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Capture a state into a snapshot record.
    #[must_use]
    pub fn capture(
        state: &ConversationState,
        metadata: SnapshotMetadata,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut messages = Vec::with_capacity(state.messages().len() + 1);
        messages.push(state.system_prompt().clone());
        messages.extend_from_slice(state.messages());

        Self {
            schema_version: SCHEMA_VERSION,
            id: SnapshotId::new(),
            session_id: state.session_id().clone(),
            created_at: now,
            token_count: state.token_total(),
            summary: summary.into(),
            messages,
            checkpoints: state.checkpoints().to_vec(),
            metadata,
        }
    }

    /// Rebuild the live state this snapshot captured.
    ///
    /// Fails with [`EmberError::Corrupt`] if the payload violates the
    /// token-sum invariant or carries no system prompt.
    pub fn into_state(self) -> Result<ConversationState> {
        let recorded = self.token_count;
        let computed = self.computed_token_sum();
        if recorded != computed {
            return Err(EmberError::Corrupt {
                snapshot_id: self.id.into_inner(),
                reason: CorruptReason::TokenSumMismatch { recorded, computed },
            });
        }

        let mut messages = self.messages.into_iter();
        let system_prompt = match messages.next() {
            Some(msg) if msg.is_system() => msg,
            _ => {
                return Err(EmberError::Corrupt {
                    snapshot_id: self.id.into_inner(),
                    reason: CorruptReason::MissingField {
                        field: "messages[0] (system prompt)".into(),
                    },
                })
            }
        };

        ConversationState::from_parts(
            self.session_id,
            system_prompt,
            self.checkpoints,
            messages.collect(),
        )
    }

    /// Token sum recomputed from the payload.
    #[must_use]
    pub fn computed_token_sum(&self) -> u64 {
        let message_tokens: u64 = self.messages.iter().map(Message::tokens).sum();
        let checkpoint_tokens: u64 = self.checkpoints.iter().map(|c| c.current_tokens).sum();
        message_tokens + checkpoint_tokens
    }

    /// Classify a raw JSON value before deserialization.
    ///
    /// Returns the corruption reason for missing required fields or an
    /// unsupported schema version; `Ok` means the value is worth handing to
    /// serde.
    pub fn validate_value(value: &Value) -> std::result::Result<(), CorruptReason> {
        for field in REQUIRED_FIELDS {
            if value.get(field).is_none() {
                return Err(CorruptReason::MissingField {
                    field: field.into(),
                });
            }
        }
        let found = value
            .get("schema_version")
            .and_then(Value::as_u64)
            .ok_or_else(|| CorruptReason::MissingField {
                field: "schema_version".into(),
            })?;
        let found = u32::try_from(found).map_err(|_| CorruptReason::UnsupportedSchema {
            found: u32::MAX,
            supported: SCHEMA_VERSION,
        })?;
        if found != SCHEMA_VERSION {
            return Err(CorruptReason::UnsupportedSchema {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
