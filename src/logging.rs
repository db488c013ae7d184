// Logging setup shared by the CLI and the server

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber: console output filtered by `RUST_LOG`.
pub fn init_logging() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
