//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`EmberSettings::default()`]
//! 2. If `~/.ember/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the merged result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::EmberSettings;

/// Resolve the path to the settings file (`~/.ember/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".ember").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<EmberSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<EmberSettings> {
    let defaults = serde_json::to_value(EmberSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: EmberSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules; invalid values are ignored with a
/// warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut EmberSettings) {
    // ── Pool ────────────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("EMBER_POOL_MIN_TOKENS", 1, 10_000_000) {
        settings.pool.min_tokens = v;
    }
    if let Some(v) = read_env_u64("EMBER_POOL_MAX_TOKENS", 1, 10_000_000) {
        settings.pool.max_tokens = v;
    }
    if let Some(v) = read_env_u64("EMBER_POOL_TARGET_TOKENS", 1, 10_000_000) {
        settings.pool.target_tokens = v;
    }
    if let Some(v) = read_env_bool("EMBER_POOL_AUTO_SIZE") {
        settings.pool.auto_size = v;
    }
    if let Some(v) = read_env_string("EMBER_KV_QUANT") {
        if let Ok(quant) = serde_json::from_value(Value::String(v.to_lowercase())) {
            settings.pool.kv_quantization = quant;
        } else {
            tracing::warn!(value = %v, "invalid EMBER_KV_QUANT, ignoring");
        }
    }
    if let Some(v) = read_env_u64("EMBER_SAFETY_BUFFER_BYTES", 0, u64::MAX) {
        settings.pool.safety_buffer_bytes = v;
    }

    // ── Compression ─────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("EMBER_PRESERVE_RECENT_TOKENS", 0, 1_000_000) {
        settings.compression.preserve_recent_tokens = v;
    }
    if let Some(v) = read_env_usize("EMBER_CHECKPOINT_CAP", 2, 1_000) {
        settings.compression.checkpoint_cap = v;
    }

    // ── Snapshots ───────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("EMBER_SNAPSHOT_MAX_COUNT", 1, 10_000) {
        settings.snapshots.max_count = v;
    }
    if let Some(v) = read_env_string("EMBER_DATA_DIR") {
        settings.snapshots.data_dir = Some(v);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
