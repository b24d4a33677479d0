//! Deterministic fallback token estimation.
//!
//! Pure functions for estimating token counts from text and messages.
//! Uses a chars/4 approximation; an optional per-model multiplier corrects
//! for tokenizers that deviate from that density. Tool results carry a
//! fixed overhead for their JSON schema envelope.

use ember_core::constants::{CHARS_PER_TOKEN, TOOL_CALL_OVERHEAD_TOKENS};
use ember_core::Message;

/// Shorthand for chars → tokens conversion.
#[allow(clippy::cast_possible_truncation)]
fn chars_to_tokens(chars: usize) -> u32 {
    chars.div_ceil(CHARS_PER_TOKEN as usize) as u32
}

/// Estimate tokens for a piece of text.
///
/// `multiplier` scales the base estimate (rounded up); `None` means 1.0.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn estimate_text_tokens(text: &str, multiplier: Option<f64>) -> u32 {
    let base = chars_to_tokens(text.chars().count());
    match multiplier {
        Some(mult) if mult.is_finite() && mult > 0.0 => {
            (f64::from(base) * mult).ceil() as u32
        }
        _ => base,
    }
}

/// Estimate tokens for a message.
///
/// Tool results get [`TOOL_CALL_OVERHEAD_TOKENS`] on top of their content
/// for the wrapper the provider serializes around them.
#[must_use]
pub fn estimate_message_tokens(message: &Message, multiplier: Option<f64>) -> u32 {
    let content = estimate_text_tokens(&message.content, multiplier);
    if message.tool_call_id.is_some() {
        content + TOOL_CALL_OVERHEAD_TOKENS
    } else {
        content
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
