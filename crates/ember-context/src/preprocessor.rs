//! Input size ceilings.
//!
//! Enormous user messages and tool results get truncated with an explicit
//! marker before they are counted and stored; whatever this returns is the
//! content the engine accounts for. Semantic preprocessing (intent
//! extraction) is deliberately not done here.

use ember_core::constants::{TOOL_RESULT_MAX_CHARS, USER_INPUT_MAX_CHARS};

/// Result of applying a size ceiling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreprocessedInput {
    /// Content to count and store (possibly truncated).
    pub content: String,
    /// Whether the ceiling was applied.
    pub truncated: bool,
    /// Original character count, when truncated.
    pub original_chars: Option<usize>,
}

/// Applies size ceilings to inbound content.
#[derive(Clone, Copy, Debug)]
pub struct InputPreprocessor {
    max_user_chars: usize,
    max_tool_chars: usize,
}

impl Default for InputPreprocessor {
    fn default() -> Self {
        Self {
            max_user_chars: USER_INPUT_MAX_CHARS,
            max_tool_chars: TOOL_RESULT_MAX_CHARS,
        }
    }
}

impl InputPreprocessor {
    /// Create a preprocessor with explicit ceilings.
    #[must_use]
    pub fn new(max_user_chars: usize, max_tool_chars: usize) -> Self {
        Self {
            max_user_chars,
            max_tool_chars,
        }
    }

    /// Bound a user message.
    #[must_use]
    pub fn prepare_user_input(&self, text: &str) -> PreprocessedInput {
        bound(text, self.max_user_chars)
    }

    /// Bound a tool result.
    #[must_use]
    pub fn prepare_tool_result(&self, content: &str) -> PreprocessedInput {
        bound(content, self.max_tool_chars)
    }
}

/// Truncate `text` to `max_chars`, appending a marker naming the original
/// size. Char-boundary safe.
fn bound(text: &str, max_chars: usize) -> PreprocessedInput {
    let total_chars = text.chars().count();
    if total_chars <= max_chars {
        return PreprocessedInput {
            content: text.to_string(),
            truncated: false,
            original_chars: None,
        };
    }

    let keep = max_chars.saturating_sub(100).max(1);
    let head: String = text.chars().take(keep).collect();
    PreprocessedInput {
        content: format!(
            "{head}...\n[Truncated: {total_chars} chars total, showing first {keep}]"
        ),
        truncated: true,
        original_chars: Some(total_chars),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
