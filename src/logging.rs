//! Process-wide `tracing` subscriber setup for binaries.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{CountsError, Result};

/// Installs a stderr `fmt` subscriber filtered by `filter`
/// (`EnvFilter` syntax, e.g. `"info,sombra_counts=debug"`).
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter).map_err(|_| CountsError::Invalid("invalid log filter"))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|_| CountsError::Invalid("logging already initialized"))
}
