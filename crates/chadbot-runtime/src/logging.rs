//! Logging setup via `tracing-subscriber`.
//!
//! `RUST_LOG` always wins over the configured level, so operators can crank
//! individual modules without touching the config file.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};

/// Initializes logging from the broker config.
///
/// # Panics
///
/// Panics if a global subscriber is already set; use [`try_init_from_config`]
/// when that can happen (tests, embedding).
pub fn init_from_config(config: &LoggingConfig) {
    try_init_from_config(config).expect("logging already initialized");
}

/// Fallible variant of [`init_from_config`].
pub fn try_init_from_config(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(fmt::layer().compact())
            .with(filter)
            .try_init(),
    }
    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
}

/// Initializes with a bare filter string, for tools and examples.
pub fn init_with_filter(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}
