//! http-tap binary.
//!
//! Parses flags, loads and validates configuration, sets up diagnostics and
//! runs the tap until a signal (or the dashboard) stops it.

use clap::Parser;

use http_tap::config::{load_config, Cli};
use http_tap::lifecycle::startup;
use http_tap::observability::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    logging::init(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "http-tap starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        target = %config.upstream.target,
        tls_listening = config.tls_listening(),
        include_bodies = config.capture.include_bodies,
        "Configuration loaded"
    );

    startup::run(config).await?;
    Ok(())
}
