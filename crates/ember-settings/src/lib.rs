//! # ember-settings
//!
//! Engine settings loaded from `~/.ember/settings.json`.
//!
//! Loading flow: compiled defaults, deep-merged with the user's JSON file,
//! then `EMBER_*` environment overrides on top. Values that fail validation
//! are rejected as a whole (`InvalidConfig`); values that fail env parsing
//! are ignored with a warning.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{CompressionSettings, DeviceSettings, EmberSettings, SnapshotSettings};
