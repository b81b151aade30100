//! Log output for the cache process.
//!
//! The level filter sits behind a reload handle so `logging.level` can be
//! applied after the subscriber is installed. `RUST_LOG`, when set, wins
//! over the configured level at startup.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*, reload};

use crate::config::{LogFormat, LoggingConfig};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("tracing subscriber already installed")]
    AlreadyInitialized,

    #[error("log filter reload failed: {0}")]
    Reload(String),
}

/// Parse a level or directive string such as `info` or `tiercache_server=debug`.
pub fn parse_filter(filter: &str) -> Result<EnvFilter, ObservabilityError> {
    EnvFilter::try_new(filter).map_err(|e| ObservabilityError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber in the configured format.
pub fn init_tracing(logging: &LoggingConfig) -> Result<(), ObservabilityError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => parse_filter(&directives)?,
        _ => parse_filter(&logging.level)?,
    };
    let (filter_layer, handle) = reload::Layer::new(filter);

    let output = match logging.format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(output)
        .try_init()
        .map_err(|_| ObservabilityError::AlreadyInitialized)?;

    // Only the first successful install reaches this point.
    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Swap the active level filter.
pub fn apply_logging_level(level: &str) -> Result<(), ObservabilityError> {
    let filter = parse_filter(level)?;
    let Some(handle) = FILTER_HANDLE.get() else {
        return Err(ObservabilityError::Reload(
            "tracing subscriber not installed".into(),
        ));
    };
    handle
        .reload(filter)
        .map_err(|e| ObservabilityError::Reload(e.to_string()))?;
    tracing::info!(level, "log level changed");
    Ok(())
}
