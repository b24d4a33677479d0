//! # ember-logging
//!
//! Structured logging with `tracing`.
//!
//! One place owns subscriber setup so every binary and test harness gets the
//! same shape: an `EnvFilter` honoring `EMBER_LOG` (falling back to a given
//! default), compact human output on stderr, and an optional JSON layer for
//! machine consumption. The sink writes to stderr and never blocks the
//! engine.

#![deny(unsafe_code)]

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable consulted for the log filter.
pub const LOG_ENV_VAR: &str = "EMBER_LOG";

/// Output format for the log layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Initialize the global subscriber, panicking if one is already set.
///
/// Intended for binaries; tests should use [`try_init`].
pub fn init(default_filter: &str, format: LogFormat) {
    try_init(default_filter, format).expect("global tracing subscriber already set");
}

/// Initialize the global subscriber, returning an error if one is already
/// set (safe to call from every test).
pub fn try_init(
    default_filter: &str,
    format: LogFormat,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_init_is_idempotent_after_first() {
        // First call may or may not win depending on test ordering; the
        // second call must report the collision instead of panicking.
        let _ = try_init("info", LogFormat::Compact);
        assert!(try_init("info", LogFormat::Compact).is_err());
    }

    #[test]
    fn default_format_is_compact() {
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }
}
