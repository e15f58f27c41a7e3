//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use docrelay_core::{
    config::LoggingConfig,
    error::{StoreError, StoreResult},
};

/// Installs a global fmt subscriber filtered at `config.level`.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
///
/// # Errors
///
/// Returns [`StoreError::Configuration`] if the level is not a valid filter directive
/// or a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> StoreResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            StoreError::Configuration(format!("invalid log level `{}`: {e}", config.level))
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| StoreError::Configuration(format!("Failed to initialize logger: {e}")))?;

    tracing::debug!(level = %config.level, "Logging initialized");
    Ok(())
}
