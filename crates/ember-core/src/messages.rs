//! Message types for the ember conversation model.
//!
//! Messages form the conversation history passed to the model provider.
//! Four roles: system, user, assistant, and tool result. Content is plain
//! text; structured tool payloads arrive pre-rendered by the (external)
//! tool layer.
//!
//! Messages are immutable once added to a conversation, with one exception:
//! `token_count` is written exactly once, on first count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

// ─────────────────────────────────────────────────────────────────────────────
// Role
// ─────────────────────────────────────────────────────────────────────────────

/// The speaker of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The standing system prompt (and checkpoint summaries).
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Message
// ─────────────────────────────────────────────────────────────────────────────

/// A single conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Stable identity; the token cache is keyed by this.
    pub id: MessageId,
    /// Who produced the message.
    pub role: Role,
    /// Plain-text content.
    pub content: String,
    /// When the message entered the conversation.
    pub created_at: DateTime<Utc>,
    /// Cached token count. `None` until first counted; written once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    /// Correlates a tool result to its call; opaque to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Position in the conversation sequence. Assigned on append; `0` until
    /// then. The system prompt never carries a sequence number.
    #[serde(default)]
    pub seq: u64,
}

impl Message {
    /// Create a message with a fresh id and no cached count.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            created_at: now,
            token_count: None,
            tool_call_id: None,
            seq: 0,
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(Role::System, content, now)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(Role::User, content, now)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(Role::Assistant, content, now)
    }

    /// Create a tool result message correlated to a tool call.
    #[must_use]
    pub fn tool(
        content: impl Into<String>,
        tool_call_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content, now)
        }
    }

    /// Builder-style: attach a cached token count.
    #[must_use]
    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = Some(tokens);
        self
    }

    /// The cached token count, or zero if never counted.
    #[must_use]
    pub fn tokens(&self) -> u64 {
        u64::from(self.token_count.unwrap_or(0))
    }

    /// Returns `true` if this is a system message.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Returns `true` if this is a user message.
    #[must_use]
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Returns `true` if this is an assistant message.
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Returns `true` if this is a tool result message.
    #[must_use]
    pub fn is_tool(&self) -> bool {
        self.role == Role::Tool
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
