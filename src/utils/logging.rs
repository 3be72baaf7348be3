//! Logging initialization
//!
//! The library itself only emits `tracing` events. Binaries and test harnesses
//! embedding the module system call one of these once at startup:
//! - Respects the RUST_LOG environment variable
//! - Falls back to a filter from `SystemConfig`, then to "info"
//! - Honours NO_COLOR
//!
//! # Usage
//! ```rust
//! use using_core::utils::init_logging;
//!
//! // RUST_LOG or "info"
//! let _ = init_logging(None);
//! ```

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

fn env_filter(filter: Option<&str>) -> EnvFilter {
    // RUST_LOG always takes precedence over the configured filter
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Initialize human-readable logging
///
/// # Arguments
/// * `filter` - Optional filter (e.g. "debug", "using_core::module::using=trace").
///              Ignored when RUST_LOG is set.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(filter: Option<&str>) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter(filter))
        .try_init()
}

/// Initialize logging with JSON output for log aggregation systems
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter(filter))
        .try_init()
}

/// Initialize logging from the `[logging]` section of `SystemConfig`
///
/// `json_format` falls back to human-readable output when the `json-logging`
/// feature is disabled.
///
/// # Example
/// ```rust
/// use using_core::config::SystemConfig;
/// use using_core::utils::init_logging_from_config;
///
/// let config = SystemConfig::default();
/// let _ = init_logging_from_config(&config.logging);
/// ```
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = config.filter.as_deref();

    if config.json_format {
        #[cfg(feature = "json-logging")]
        {
            return init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            tracing::debug!("json-logging feature disabled, using plain output");
        }
    }
    init_logging(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_initialization_is_an_error() {
        // Whichever call wins installs the subscriber; the other must not panic
        let first = init_logging(Some("debug"));
        let second = init_logging(None);
        assert!(first.is_err() || second.is_err());
    }
}
