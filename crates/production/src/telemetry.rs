//! Tracing subscriber setup.
//!
//! Log levels follow these conventions:
//! - ERROR: storage failures, the runner stopping
//! - WARN: failed transmissions, unreachable nodes, rejected replies
//! - INFO: network open, provisioning and key refresh progress
//! - DEBUG: queue execution, per-request status handling
//! - TRACE: every event and action crossing the runner

use crate::config::LoggingSection;
use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` wins, then `default_level`, raised by
/// `verbosity` (`-v` debug, `-vv` trace).
pub fn filter(default_level: &str, verbosity: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match verbosity {
        0 => default_level,
        1 => "debug",
        _ => "trace",
    };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber from the `[logging]` section.
///
/// Does nothing if a subscriber is already installed.
pub fn init(logging: &LoggingSection, verbosity: u8) {
    let filter = filter(&logging.level, verbosity);
    let result = if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
