use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

use crate::util::env::init_env;

/// Filter used when `RUST_LOG` is unset: engine at info, sqlx statement logs muted.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

/// Load `.env`, then start logging. Call once at the top of a binary's `main`.
pub fn bootstrap_cli(bin_name: &str) -> Result<(), anyhow::Error> {
    init_env();
    init_tracing(DEFAULT_FILTER)?;
    info!(
        target = "bootstrap",
        bin = bin_name,
        version = env!("CARGO_PKG_VERSION"),
        "starting"
    );
    Ok(())
}
