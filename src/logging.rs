//! Log subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::ConfigError;

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
///
/// Panics if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init_logging`], but reports an already installed subscriber as an
/// error
pub fn try_init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}
