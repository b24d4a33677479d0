//! Settings sections.
//!
//! Every section deserializes with `default`, so a partial settings file
//! only overrides the keys it names. The `pool` section is the engine's
//! [`PoolConfig`] verbatim, so there is one source of truth for pool shape.

use serde::{Deserialize, Serialize};

use ember_core::PoolConfig;

use crate::errors::{Result, SettingsError};

/// Container for all engine settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmberSettings {
    /// Token pool sizing.
    pub pool: PoolConfig,
    /// Compression pass tuning.
    pub compression: CompressionSettings,
    /// Snapshot retention and storage.
    pub snapshots: SnapshotSettings,
    /// Device memory probing.
    pub device: DeviceSettings,
}

impl EmberSettings {
    /// Validate every section, rejecting the whole settings object on the
    /// first violation.
    pub fn validate(&self) -> Result<()> {
        self.pool
            .validate()
            .map_err(|e| SettingsError::InvalidValue(e.to_string()))?;
        self.compression.validate()?;
        self.snapshots.validate()?;
        self.device.validate()
    }
}

/// Compression pass tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionSettings {
    /// Tokens of recent messages preserved verbatim by a Hybrid pass.
    pub preserve_recent_tokens: u64,
    /// Preserve budget used by an Emergency pass (smaller, more aggressive).
    pub emergency_preserve_recent_tokens: u64,
    /// Maximum live checkpoints before the oldest are merged.
    pub checkpoint_cap: usize,
    /// Hard ceiling on one summarizer call (milliseconds).
    pub summarizer_timeout_ms: u64,
    /// Write a recovery snapshot before each pass (best-effort).
    pub snapshot_before_compress: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            preserve_recent_tokens: 2_000,
            emergency_preserve_recent_tokens: 500,
            checkpoint_cap: ember_core::constants::CHECKPOINT_CAP,
            summarizer_timeout_ms: ember_core::constants::SUMMARIZER_TIMEOUT_MS,
            snapshot_before_compress: true,
        }
    }
}

impl CompressionSettings {
    fn validate(&self) -> Result<()> {
        if self.checkpoint_cap < 2 {
            return Err(SettingsError::InvalidValue(format!(
                "checkpointCap {} must be at least 2",
                self.checkpoint_cap
            )));
        }
        if self.emergency_preserve_recent_tokens > self.preserve_recent_tokens {
            return Err(SettingsError::InvalidValue(
                "emergencyPreserveRecentTokens must not exceed preserveRecentTokens".into(),
            ));
        }
        if self.summarizer_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "summarizerTimeoutMs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot retention and storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotSettings {
    /// Maximum snapshots retained per session.
    pub max_count: usize,
    /// Data directory override; `None` resolves to `~/.ember`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            max_count: 5,
            data_dir: None,
        }
    }
}

impl SnapshotSettings {
    fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(SettingsError::InvalidValue(
                "snapshots.maxCount must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Device memory probing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSettings {
    /// Poll interval while a request is in flight (milliseconds).
    pub poll_interval_ms: u64,
    /// Per-probe command timeout (milliseconds).
    pub probe_timeout_ms: u64,
    /// Loaded model size used by the conservative fallback profile.
    pub model_params_billion: f64,
    /// Fraction of total device memory below which `low_memory` fires.
    pub low_memory_fraction: f64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            probe_timeout_ms: 2_000,
            model_params_billion: 7.0,
            low_memory_fraction: 0.20,
        }
    }
}

impl DeviceSettings {
    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "device.pollIntervalMs must be positive".into(),
            ));
        }
        if !(self.model_params_billion.is_finite() && self.model_params_billion > 0.0) {
            return Err(SettingsError::InvalidValue(format!(
                "device.modelParamsBillion {} must be finite and positive",
                self.model_params_billion
            )));
        }
        if !(0.0..1.0).contains(&self.low_memory_fraction) {
            return Err(SettingsError::InvalidValue(format!(
                "device.lowMemoryFraction {} must be in [0, 1)",
                self.low_memory_fraction
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
