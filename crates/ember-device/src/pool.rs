//! Context pool sizing.
//!
//! The pool size is the token ceiling the session must respect. In auto
//! mode it is derived from free device memory and KV quantization:
//!
//! ```text
//! bytes_per_token = params_billion * 2 * q_factor
//! usable_bytes    = max(0, free_bytes - safety_buffer_bytes)
//! candidate       = floor(usable_bytes / bytes_per_token)
//! pool_size       = clamp(candidate, min_tokens, max_tokens)
//! ```
//!
//! In manual mode (`auto_size == false`) the pool is the clamped target.
//!
//! [`ContextPool::resize`] is the only mutator. It refuses to shrink the
//! pool below the live token total; the caller must compress first. The
//! façade owns the pool exclusively, which serializes concurrent resizes;
//! it also emits `context_resized` so the provider can reload if needed.

use tracing::info;

use ember_core::{EmberError, PoolConfig, Result};

use crate::memory::DeviceMemory;

/// Token pool sized from device memory and quantization.
#[derive(Clone, Debug)]
pub struct ContextPool {
    config: PoolConfig,
    params_billion: f64,
    size: u64,
}

impl ContextPool {
    /// Create a pool; the initial size is the clamped target until the
    /// first auto-size reading arrives.
    pub fn new(config: PoolConfig, params_billion: f64) -> Result<Self> {
        config.validate()?;
        if !(params_billion.is_finite() && params_billion > 0.0) {
            return Err(EmberError::invalid_config(format!(
                "params_billion {params_billion} must be finite and positive"
            )));
        }
        let size = config.clamped_target();
        Ok(Self {
            config,
            params_billion,
            size,
        })
    }

    /// Current pool size in tokens.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Bytes of KV cache one token of context costs.
    #[must_use]
    pub fn bytes_per_token(&self) -> f64 {
        self.params_billion * 2.0 * self.config.kv_quantization.q_factor()
    }

    /// Compute the target size for a device reading (pure; no mutation).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn compute_size(&self, device: &DeviceMemory) -> u64 {
        if !self.config.auto_size {
            return self.config.clamped_target();
        }
        let usable = device.free.saturating_sub(self.config.safety_buffer_bytes);
        let candidate = (usable as f64 / self.bytes_per_token()).floor() as u64;
        candidate.clamp(self.config.min_tokens, self.config.max_tokens)
    }

    /// Resize the pool.
    ///
    /// Rejects sizes outside `[min_tokens, max_tokens]` and sizes smaller
    /// than `current_token_total` (the caller must compress first). Returns
    /// the applied size. Messages and checkpoints are untouched by design:
    /// the pool holds no conversation state.
    pub fn resize(&mut self, new_size: u64, current_token_total: u64) -> Result<u64> {
        if new_size < self.config.min_tokens || new_size > self.config.max_tokens {
            return Err(EmberError::invalid_config(format!(
                "pool size {new_size} outside [{}, {}]",
                self.config.min_tokens, self.config.max_tokens
            )));
        }
        if new_size < current_token_total {
            return Err(EmberError::BudgetExceeded {
                required: current_token_total,
                available: new_size,
            });
        }
        if new_size != self.size {
            info!(from = self.size, to = new_size, "pool resized");
            self.size = new_size;
        }
        Ok(self.size)
    }

    /// Replace the configuration, re-validating and re-clamping.
    ///
    /// In manual mode the size snaps to the new clamped target; in auto
    /// mode the current size is re-clamped into the new bounds. Unlike
    /// [`ContextPool::resize`], shrinking below the live token total is
    /// allowed here; the pre-send threshold machine resolves the resulting
    /// overflow (by compression or rollover) on the next turn.
    pub fn update_config(&mut self, config: PoolConfig) -> Result<u64> {
        config.validate()?;
        let new_size = if config.auto_size {
            self.size.clamp(config.min_tokens, config.max_tokens)
        } else {
            config.clamped_target()
        };
        self.config = config;
        self.size = new_size;
        Ok(self.size)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use ember_core::KvQuantization;

    const GIB: u64 = 1_073_741_824;

    fn config() -> PoolConfig {
        PoolConfig {
            min_tokens: 2_048,
            max_tokens: 65_536,
            target_tokens: 32_768,
            auto_size: true,
            kv_quantization: KvQuantization::F16,
            safety_buffer_bytes: GIB,
            token_multiplier: None,
        }
    }

    fn device(free: u64) -> DeviceMemory {
        DeviceMemory {
            total: free * 2,
            used: free,
            free,
            model_resident: 0,
        }
    }

    // -- construction --

    #[test]
    fn new_pool_starts_at_clamped_target() {
        let pool = ContextPool::new(config(), 7.0).unwrap();
        assert_eq!(pool.size(), 32_768);
    }

    #[test]
    fn invalid_config_rejected() {
        let bad = PoolConfig {
            min_tokens: 0,
            ..config()
        };
        assert_matches!(
            ContextPool::new(bad, 7.0),
            Err(EmberError::InvalidConfig { .. })
        );
    }

    #[test]
    fn invalid_params_rejected() {
        assert_matches!(
            ContextPool::new(config(), 0.0),
            Err(EmberError::InvalidConfig { .. })
        );
        assert_matches!(
            ContextPool::new(config(), f64::NAN),
            Err(EmberError::InvalidConfig { .. })
        );
    }

    // -- sizing formula --

    #[test]
    fn bytes_per_token_follows_quantization() {
        let pool = ContextPool::new(config(), 7.0).unwrap();
        // 7B * 2 bytes * 2.0 (F16) = 28 bytes per token
        assert!((pool.bytes_per_token() - 28.0).abs() < f64::EPSILON);

        let q4 = ContextPool::new(
            PoolConfig {
                kv_quantization: KvQuantization::Q4,
                ..config()
            },
            7.0,
        )
        .unwrap();
        assert!((q4.bytes_per_token() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn compute_size_subtracts_safety_buffer() {
        let pool = ContextPool::new(config(), 7.0).unwrap();
        // free 2 GiB, buffer 1 GiB → 1 GiB usable / 28 B per token ≈ 38.3M,
        // clamped to max
        assert_eq!(pool.compute_size(&device(2 * GIB)), 65_536);
    }

    #[test]
    fn compute_size_clamps_to_min_when_starved() {
        let pool = ContextPool::new(config(), 7.0).unwrap();
        // free under the buffer → zero usable → clamp to min
        assert_eq!(pool.compute_size(&device(GIB / 2)), 2_048);
    }

    #[test]
    fn compute_size_mid_range() {
        let pool = ContextPool::new(config(), 7.0).unwrap();
        // usable exactly 28 * 10_000 bytes over the buffer
        let free = GIB + 280_000;
        assert_eq!(pool.compute_size(&device(free)), 10_000);
    }

    #[test]
    fn manual_mode_ignores_device() {
        let pool = ContextPool::new(
            PoolConfig {
                auto_size: false,
                target_tokens: 4_096,
                ..config()
            },
            7.0,
        )
        .unwrap();
        assert_eq!(pool.compute_size(&device(64 * GIB)), 4_096);
    }

    // -- resize --

    #[test]
    fn resize_applies_within_bounds() {
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        assert_eq!(pool.resize(8_192, 1_000).unwrap(), 8_192);
        assert_eq!(pool.size(), 8_192);
    }

    #[test]
    fn resize_out_of_bounds_rejected() {
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        assert_matches!(
            pool.resize(1_024, 0),
            Err(EmberError::InvalidConfig { .. })
        );
        assert_matches!(
            pool.resize(1_000_000, 0),
            Err(EmberError::InvalidConfig { .. })
        );
        assert_eq!(pool.size(), 32_768);
    }

    #[test]
    fn resize_below_live_total_rejected() {
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        let err = pool.resize(4_096, 5_000).unwrap_err();
        assert_matches!(
            err,
            EmberError::BudgetExceeded {
                required: 5_000,
                available: 4_096
            }
        );
        assert_eq!(pool.size(), 32_768);
    }

    // -- update_config --

    #[test]
    fn update_config_manual_snaps_to_target() {
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        let size = pool
            .update_config(PoolConfig {
                auto_size: false,
                target_tokens: 8_192,
                ..config()
            })
            .unwrap();
        assert_eq!(size, 8_192);
    }

    #[test]
    fn update_config_auto_reclamps_size() {
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        let size = pool
            .update_config(PoolConfig {
                max_tokens: 16_384,
                target_tokens: 16_384,
                ..config()
            })
            .unwrap();
        assert_eq!(size, 16_384);
    }

    #[test]
    fn update_config_may_shrink_below_live_total() {
        // Shrinking below the live token total is the guard's problem, not
        // the pool's; the next pre-send resolves the overflow.
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        let size = pool
            .update_config(PoolConfig {
                auto_size: false,
                target_tokens: 2_048,
                ..config()
            })
            .unwrap();
        assert_eq!(size, 2_048);
        assert!(!pool.config().auto_size);
    }

    #[test]
    fn update_config_invalid_rejected_without_mutation() {
        let mut pool = ContextPool::new(config(), 7.0).unwrap();
        let err = pool
            .update_config(PoolConfig {
                min_tokens: 0,
                ..config()
            })
            .unwrap_err();
        assert_matches!(err, EmberError::InvalidConfig { .. });
        assert!(pool.config().auto_size);
        assert_eq!(pool.size(), 32_768);
    }
}
