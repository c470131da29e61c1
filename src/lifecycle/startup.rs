//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order from a validated config
//! - Start background tasks (exchange log, dashboard, signal handler)
//! - Bind the listener last, then serve until shutdown and drain
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Shutdown stops accepting first, then waits for sessions up to a deadline

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::config::TapConfig;
use crate::dashboard;
use crate::http::{ServerError, TapServer};
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics, Aggregator, Observer};

use super::shutdown::Shutdown;
use super::signals;

/// How long the exchange log gets to flush after the last session ends.
const LOG_FLUSH: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Run the tap until a signal or the dashboard asks it to stop.
pub async fn run(config: TapConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    run_until(config, shutdown).await
}

/// Like [`run`], with an externally owned shutdown coordinator.
pub async fn run_until(config: TapConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    let obs = &config.observability;
    let stop_accepting = shutdown.subscribe();
    let stop_dashboard = shutdown.subscribe();

    if obs.metrics_enabled {
        let addr: SocketAddr = obs
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(obs.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let aggregator = Aggregator::new();
    let (observer, log_task) = if obs.dashboard {
        (Observer::new(aggregator.clone(), None), None)
    } else {
        let (observer, rx) = Observer::channel(aggregator.clone());
        (observer, Some(logging::spawn_exchange_log(rx, obs.log_format)))
    };

    let dropped = observer.drop_count();
    let server = TapServer::new(&config, observer)?;
    let listener = Listener::bind(&config.listener).await?;

    signals::spawn_signal_handler(shutdown.clone());

    if obs.dashboard {
        let aggregator = aggregator.clone();
        let refresh = Duration::from_millis(obs.dashboard_refresh_ms);
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = dashboard::run(aggregator, refresh, stop_dashboard) {
                tracing::error!(error = %e, "Dashboard failed");
            }
            shutdown.trigger();
        });
    }

    let tracker = server.tracker();
    server.run(listener, stop_accepting).await?;

    let drain = Duration::from_secs(config.timeouts.drain_secs);
    if tracker.drain(drain).await {
        tracing::info!("All sessions closed");
    } else {
        tracing::warn!(
            remaining = tracker.active_count(),
            deadline = ?drain,
            "Drain deadline passed, exiting with sessions open"
        );
    }

    if let Some(task) = log_task {
        let _ = tokio::time::timeout(LOG_FLUSH, task).await;
    }
    if dropped.get() > 0 {
        tracing::warn!(dropped = dropped.get(), "Some observations were never logged");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
