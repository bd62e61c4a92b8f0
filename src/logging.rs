#![forbid(unsafe_code)]

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info,newtube_proxy=debug";

/// Installs the global `tracing` subscriber writing to stderr. `RUST_LOG`
/// replaces the default filter when set.
pub fn init_logging() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("initializing logging: {err}"))?;

    tracing::debug!("logging initialized");
    Ok(())
}
