//! Pool configuration.
//!
//! [`PoolConfig`] is the closed record describing how the context pool is
//! sized: hard min/max bounds, the manual target, whether auto-sizing from
//! device memory is on, the KV-cache quantization in effect, and the safety
//! buffer withheld from free device memory. It is mutated only through the
//! façade's `update_config`.

use serde::{Deserialize, Serialize};

use crate::errors::{EmberError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// KvQuantization
// ─────────────────────────────────────────────────────────────────────────────

/// KV-cache quantization, which scales bytes-per-token of context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvQuantization {
    /// 16-bit floats (full precision KV cache).
    #[default]
    F16,
    /// 8-bit quantized KV cache.
    Q8,
    /// 4-bit quantized KV cache.
    Q4,
}

impl KvQuantization {
    /// Multiplier applied to the F32-relative bytes-per-token baseline.
    #[must_use]
    pub fn q_factor(self) -> f64 {
        match self {
            Self::F16 => 2.0,
            Self::Q8 => 1.0,
            Self::Q4 => 0.5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PoolConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration of the token pool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Smallest pool the engine will run with.
    pub min_tokens: u64,
    /// Largest pool the engine will allocate.
    pub max_tokens: u64,
    /// Pool size used when `auto_size` is off (clamped to min/max).
    pub target_tokens: u64,
    /// Derive the pool size from free device memory.
    pub auto_size: bool,
    /// KV-cache quantization in effect.
    pub kv_quantization: KvQuantization,
    /// Bytes withheld from free device memory before sizing.
    pub safety_buffer_bytes: u64,
    /// Optional per-model correction applied to the token estimator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_multiplier: Option<f64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_tokens: 2_048,
            max_tokens: 65_536,
            target_tokens: 32_768,
            auto_size: true,
            kv_quantization: KvQuantization::default(),
            safety_buffer_bytes: 1_073_741_824, // 1 GiB
            token_multiplier: None,
        }
    }
}

impl PoolConfig {
    /// Validate the configuration, rejecting without mutation on violation.
    pub fn validate(&self) -> Result<()> {
        if self.min_tokens == 0 {
            return Err(EmberError::invalid_config("min_tokens must be positive"));
        }
        if self.min_tokens > self.max_tokens {
            return Err(EmberError::invalid_config(format!(
                "min_tokens {} exceeds max_tokens {}",
                self.min_tokens, self.max_tokens
            )));
        }
        if self.target_tokens == 0 {
            return Err(EmberError::invalid_config("target_tokens must be positive"));
        }
        if let Some(mult) = self.token_multiplier {
            if !mult.is_finite() || mult <= 0.0 {
                return Err(EmberError::invalid_config(format!(
                    "token_multiplier {mult} must be finite and positive"
                )));
            }
        }
        Ok(())
    }

    /// The manual-mode pool size: the target clamped into bounds.
    #[must_use]
    pub fn clamped_target(&self) -> u64 {
        self.target_tokens.clamp(self.min_tokens, self.max_tokens)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
