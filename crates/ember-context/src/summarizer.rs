//! Summarizer trait and the deterministic fallback.
//!
//! The external summarizer (typically a small model driven by the provider
//! adapter) implements [`Summarizer`]. [`ExtractiveSummarizer`] is the
//! built-in fallback: pure extraction with no model call, so it cannot fail. It
//! backs the Truncate strategy and every summarizer-failure path.
//!
//! [`serialize_messages`] renders a capped line-based transcript for
//! summarizer implementations that want to prompt a model with the raw
//! conversation.

use async_trait::async_trait;

use ember_core::constants::CHARS_PER_TOKEN;
use ember_core::{Message, Role};

use ember_tokens::estimate_text_tokens;

/// Maximum serialized character length for a summarizer transcript.
const MAX_SERIALIZED_CHARS: usize = 150_000;

/// Truncation limit for assistant text lines in the transcript.
const ASSISTANT_TEXT_LIMIT: usize = 300;

/// Truncation limit for tool result lines in the transcript.
const TOOL_RESULT_TEXT_LIMIT: usize = 100;

// =============================================================================
// Trait
// =============================================================================

/// Structured facts pulled out of an absorbed conversation span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExtractedFacts {
    /// Decisions worth preserving through aging.
    pub key_decisions: Vec<String>,
    /// Files touched in the span.
    pub files_modified: Vec<String>,
    /// Work items still open.
    pub next_steps: Vec<String>,
}

/// A summarizer's answer.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryOutput {
    /// The narrative summary.
    pub text: String,
    /// The summarizer's own token estimate (advisory; the engine
    /// re-measures).
    pub approximate_tokens: u32,
    /// Structured facts, when the summarizer extracts them.
    pub facts: ExtractedFacts,
}

/// Errors a summarizer implementation can produce.
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    /// The call exceeded its deadline.
    #[error("summarizer timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that expired.
        timeout_ms: u64,
    },
    /// The model returned unusable output.
    #[error("failed to parse summarizer response: {reason}")]
    ParseError {
        /// Why parsing failed.
        reason: String,
    },
    /// The call itself failed.
    #[error("summarizer call failed: {message}")]
    CallFailed {
        /// Error message.
        message: String,
    },
}

/// Produces narrative summaries of conversation spans.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages` into roughly `target_tokens` tokens, guided by
    /// `instruction`.
    async fn summarize(
        &self,
        messages: &[Message],
        target_tokens: u32,
        instruction: &str,
    ) -> Result<SummaryOutput, SummarizerError>;
}

// =============================================================================
// Extractive fallback
// =============================================================================

/// Deterministic, model-free summarizer.
///
/// Extracts user requests, files named in tool results, and the opening
/// sentences of assistant replies, then concatenates them into a narrative
/// bounded by the target budget. Used when no external summarizer is wired,
/// on every summarizer failure, and by the Truncate strategy.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractiveSummarizer;

impl ExtractiveSummarizer {
    /// Create the fallback summarizer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core so non-async callers (rollover synopsis) can reuse
    /// it.
    #[must_use]
    pub fn extract(messages: &[Message], target_tokens: u32) -> SummaryOutput {
        let mut requests = Vec::new();
        let mut topics = Vec::new();
        let mut files = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    let text = msg.content.trim();
                    if !text.is_empty() {
                        requests.push(truncate(text, 200));
                    }
                }
                Role::Assistant => {
                    if let Some(first) = msg.content.split('.').next() {
                        let topic = truncate(first.trim(), 80);
                        if !topic.is_empty() && !topics.contains(&topic) {
                            topics.push(topic);
                        }
                    }
                }
                Role::Tool => {
                    for path in extract_paths(&msg.content) {
                        if !files.contains(&path) {
                            files.push(path);
                        }
                    }
                }
                Role::System => {}
            }
        }

        let narrative = if requests.is_empty() {
            format!("({} earlier messages absorbed)", messages.len())
        } else {
            let mut parts = Vec::new();
            parts.push(format!(
                "The user made {} request(s). Key requests: {}",
                requests.len(),
                requests.join("; ")
            ));
            if !topics.is_empty() {
                parts.push(format!("Assistant covered: {}", topics.join("; ")));
            }
            if !files.is_empty() {
                parts.push(format!("Files touched: {}", files.join(", ")));
            }
            parts.join(" ")
        };

        let budget_chars = target_tokens as usize * CHARS_PER_TOKEN as usize;
        let text = truncate(&narrative, budget_chars.max(16));
        let approximate_tokens = estimate_text_tokens(&text, None);

        SummaryOutput {
            text,
            approximate_tokens,
            facts: ExtractedFacts {
                key_decisions: Vec::new(),
                files_modified: files,
                next_steps: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(
        &self,
        messages: &[Message],
        target_tokens: u32,
        _instruction: &str,
    ) -> Result<SummaryOutput, SummarizerError> {
        Ok(Self::extract(messages, target_tokens))
    }
}

// =============================================================================
// Transcript serialization
// =============================================================================

/// Serialize messages into a line-based transcript for model-backed
/// summarizers.
///
/// Format:
/// ```text
/// [USER] text...
/// [ASSISTANT] text... (truncated to 300 chars)
/// [TOOL_RESULT] text... (truncated to 100 chars)
/// ```
///
/// Transcripts over the cap keep the first and last quarter with an
/// omission marker in between.
#[must_use]
pub fn serialize_messages(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for msg in messages {
        match msg.role {
            Role::User => {
                if !msg.content.is_empty() {
                    lines.push(format!("[USER] {}", msg.content));
                }
            }
            Role::Assistant => {
                lines.push(format!(
                    "[ASSISTANT] {}",
                    truncate(&msg.content, ASSISTANT_TEXT_LIMIT)
                ));
            }
            Role::Tool => {
                lines.push(format!(
                    "[TOOL_RESULT] {}",
                    truncate(&msg.content, TOOL_RESULT_TEXT_LIMIT)
                ));
            }
            Role::System => {
                lines.push(format!("[SYSTEM] {}", truncate(&msg.content, 200)));
            }
        }
    }
    cap_transcript(&lines.join("\n"), MAX_SERIALIZED_CHARS)
}

/// Pull plausible file paths out of tool output.
fn extract_paths(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .filter(|word| {
            word.len() > 1 && (word.starts_with('/') || word.starts_with("./")) && word.contains('/')
        })
        .map(|word| word.trim_end_matches([',', ';', ':', ')']).to_string())
        .collect()
}

/// Cap a transcript, keeping the head and tail quarters.
fn cap_transcript(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }
    let quarter = max_chars / 4;
    let head: String = text.chars().take(quarter).collect();
    let tail_chars = text.chars().count().saturating_sub(quarter);
    let tail: String = text.chars().skip(tail_chars).collect();
    let omitted = text.len().saturating_sub(head.len() + tail.len());
    format!("{head}\n[... {omitted} characters omitted ...]\n{tail}")
}

/// Truncate to `max_len` chars, appending "..." when shortened.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

// =============================================================================
// Tests
// =============================================================================
