//! Log output for binaries built on the client.
//!
//! Events go to stderr so command output on stdout stays clean. The filter
//! sits behind a reload handle: a binary installs the subscriber first and
//! applies the configured level once its config has loaded.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::ConfigError;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Level used until [`set_log_level`] is called.
pub const STARTUP_LEVEL: &str = "warn";

/// Parse a level or filter directive (`debug`, `tabla_client=trace,warn`).
pub fn parse_filter(level: &str) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_new(level)
        .map_err(|e| ConfigError::Validation(format!("logging.level '{level}' is invalid: {e}")))
}

/// Install the global subscriber. Later calls are no-ops.
///
/// `RUST_LOG` wins over [`STARTUP_LEVEL`] and over any later
/// [`set_log_level`].
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(STARTUP_LEVEL));
    let (layer, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

/// Swap the active filter, e.g. to the configured level or `--verbose`.
pub fn set_log_level(level: &str) -> Result<(), ConfigError> {
    let filter = parse_filter(level)?;
    if std::env::var_os("RUST_LOG").is_some() {
        return Ok(());
    }
    if let Some(handle) = FILTER_HANDLE.get()
        && let Err(e) = handle.reload(filter)
    {
        tracing::warn!(error = %e, "Failed to apply log level");
    }
    Ok(())
}
