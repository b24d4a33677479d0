//! Memoizing token counter.
//!
//! [`TokenCounter`] is the single counting authority for a session. When a
//! provider exposes a tokenizer it is preferred and its results are cached
//! by message id; otherwise the deterministic estimator is used. The cache
//! is invalidated wholesale when the active model changes, since token
//! densities differ per model.
//!
//! Counting never fails: a provider result that is non-finite or negative
//! degrades silently to the estimator with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use ember_core::constants::TOOL_CALL_OVERHEAD_TOKENS;
use ember_core::{Message, MessageId};

use crate::estimator::estimate_text_tokens;

/// Provider-side tokenizer, when the model exposes exact counts.
#[cfg_attr(test, mockall::automock)]
pub trait ProviderTokenizer: Send + Sync {
    /// Exact token count for `text`, or `None` if unsupported.
    ///
    /// Implementations may return garbage on provider bugs; the counter
    /// validates before trusting the value.
    fn count_tokens(&self, text: &str) -> Option<f64>;
}

/// Session-scoped counting authority with a per-message memo.
pub struct TokenCounter {
    provider: Option<Arc<dyn ProviderTokenizer>>,
    cache: HashMap<MessageId, u32>,
    model: String,
    multiplier: Option<f64>,
}

impl TokenCounter {
    /// Create a counter for `model` with no provider tokenizer.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            provider: None,
            cache: HashMap::new(),
            model: model.into(),
            multiplier: None,
        }
    }

    /// Attach a provider tokenizer.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ProviderTokenizer>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the per-model estimator multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: Option<f64>) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// The model the cache is valid for.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switch models, invalidating the whole cache if the model changed.
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        if model != self.model {
            debug!(
                from = %self.model,
                to = %model,
                invalidated = self.cache.len(),
                "model changed, dropping token cache"
            );
            self.cache.clear();
            self.model = model;
        }
    }

    /// Update the estimator multiplier (e.g. after `update_config`).
    ///
    /// Only estimator-derived counts depend on it, so a change invalidates
    /// the cache as well.
    pub fn set_multiplier(&mut self, multiplier: Option<f64>) {
        #[allow(clippy::float_cmp)]
        if multiplier != self.multiplier {
            self.cache.clear();
            self.multiplier = multiplier;
        }
    }

    /// Count tokens for raw text. Never fails.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn count(&self, text: &str) -> u32 {
        if let Some(provider) = &self.provider {
            if let Some(raw) = provider.count_tokens(text) {
                if raw.is_finite() && raw >= 0.0 {
                    return raw.round() as u32;
                }
                warn!(
                    model = %self.model,
                    raw,
                    "provider tokenizer returned invalid count, using estimator"
                );
            }
        }
        estimate_text_tokens(text, self.multiplier)
    }

    /// Count tokens for `text`, memoized by `msg_id`.
    ///
    /// For the same `(msg_id, text, model)` within a session this returns a
    /// stable value without recomputation.
    pub fn count_cached(&mut self, msg_id: &MessageId, text: &str) -> u32 {
        if let Some(&cached) = self.cache.get(msg_id) {
            return cached;
        }
        let tokens = self.count(text);
        let _ = self.cache.insert(msg_id.clone(), tokens);
        tokens
    }

    /// Count a message, including the tool wrapper overhead, memoized.
    pub fn count_message(&mut self, message: &Message) -> u32 {
        let content = self.count_cached(&message.id, &message.content);
        if message.tool_call_id.is_some() {
            content + TOOL_CALL_OVERHEAD_TOKENS
        } else {
            content
        }
    }

    /// Number of memoized entries (diagnostics).
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    /// Mock that answers every call with the same raw value.
    fn provider_returning(value: f64) -> MockProviderTokenizer {
        let mut provider = MockProviderTokenizer::new();
        let _ = provider
            .expect_count_tokens()
            .returning(move |_| Some(value));
        provider
    }

    // -- count --

    #[test]
    fn count_without_provider_uses_estimator() {
        let counter = TokenCounter::new("llama3:8b");
        assert_eq!(counter.count("hello"), 2);
    }

    #[test]
    fn count_prefers_provider() {
        let counter = TokenCounter::new("llama3:8b")
            .with_provider(Arc::new(provider_returning(42.0)));
        assert_eq!(counter.count("hello"), 42);
    }

    #[test]
    fn invalid_provider_count_degrades_to_estimator() {
        for bad in [f64::NAN, f64::INFINITY, -3.0] {
            let counter = TokenCounter::new("llama3:8b")
                .with_provider(Arc::new(provider_returning(bad)));
            assert_eq!(counter.count("hello"), 2, "for provider value {bad}");
        }
    }

    #[test]
    fn unsupported_provider_falls_back_to_estimator() {
        let mut provider = MockProviderTokenizer::new();
        let _ = provider.expect_count_tokens().returning(|_| None);
        let counter =
            TokenCounter::new("llama3:8b").with_provider(Arc::new(provider));
        assert_eq!(counter.count("hello"), 2);
    }

    #[test]
    fn multiplier_applies_to_estimator_path() {
        let counter = TokenCounter::new("llama3:8b").with_multiplier(Some(2.0));
        assert_eq!(counter.count("abcd"), 2);
    }

    // -- count_cached --

    #[test]
    fn cached_count_is_stable_and_computed_once() {
        // the mock enforces the single-computation guarantee on drop
        let mut provider = MockProviderTokenizer::new();
        let _ = provider
            .expect_count_tokens()
            .times(1)
            .returning(|_| Some(7.0));
        let mut counter =
            TokenCounter::new("llama3:8b").with_provider(Arc::new(provider));
        let id = MessageId::new();

        assert_eq!(counter.count_cached(&id, "some text"), 7);
        assert_eq!(counter.count_cached(&id, "some text"), 7);
    }

    #[test]
    fn distinct_ids_count_separately() {
        let mut counter = TokenCounter::new("llama3:8b");
        let a = MessageId::new();
        let b = MessageId::new();
        assert_eq!(counter.count_cached(&a, "abcd"), 1);
        assert_eq!(counter.count_cached(&b, "abcdefgh"), 2);
        assert_eq!(counter.cache_len(), 2);
    }

    // -- model change --

    #[test]
    fn model_change_invalidates_cache() {
        let mut counter = TokenCounter::new("llama3:8b");
        let id = MessageId::new();
        let _ = counter.count_cached(&id, "abcd");
        assert_eq!(counter.cache_len(), 1);

        counter.set_model("qwen2:7b");
        assert_eq!(counter.cache_len(), 0);
        assert_eq!(counter.model(), "qwen2:7b");
    }

    #[test]
    fn same_model_keeps_cache() {
        let mut counter = TokenCounter::new("llama3:8b");
        let id = MessageId::new();
        let _ = counter.count_cached(&id, "abcd");
        counter.set_model("llama3:8b");
        assert_eq!(counter.cache_len(), 1);
    }

    #[test]
    fn multiplier_change_invalidates_cache() {
        let mut counter = TokenCounter::new("llama3:8b");
        let id = MessageId::new();
        assert_eq!(counter.count_cached(&id, "abcdefgh"), 2);
        counter.set_multiplier(Some(1.5));
        assert_eq!(counter.cache_len(), 0);
        assert_eq!(counter.count_cached(&id, "abcdefgh"), 3);
    }

    // -- count_message --

    #[test]
    fn tool_message_gets_overhead_on_top_of_cache() {
        let mut counter = TokenCounter::new("llama3:8b");
        let msg = ember_core::Message::tool("abcd", "tc-1", epoch());
        assert_eq!(counter.count_message(&msg), 51);
        // second call hits the cache for content, still adds overhead
        assert_eq!(counter.count_message(&msg), 51);
    }
}
