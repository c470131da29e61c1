//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tap_exchanges_total` (counter): completed exchanges by method, status
//! - `tap_exchange_duration_seconds` (histogram): exchange latency
//! - `tap_session_errors_total` (counter): per-session failures by stage
//! - `tap_active_sessions` (gauge): live sessions
//! - `tap_tunnel_bytes_total` (counter): tunnelled bytes by direction
//! - `tap_observations_dropped_total` (counter): records the exchange log had no room for
//!
//! # Design Decisions
//! - Recording is always on; without an installed exporter the macros are no-ops
//! - The Prometheus exporter is only installed when enabled in config
//! - Method labels are a closed set; anything nonstandard counts as `OTHER`

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!("tap_exchanges_total", "Completed exchanges by method and status");
    ::metrics::describe_histogram!(
        "tap_exchange_duration_seconds",
        ::metrics::Unit::Seconds,
        "Time from request head to end of response body"
    );
    ::metrics::describe_counter!("tap_session_errors_total", "Per-session failures by stage");
    ::metrics::describe_gauge!("tap_active_sessions", "Sessions currently open");
    ::metrics::describe_counter!(
        "tap_tunnel_bytes_total",
        ::metrics::Unit::Bytes,
        "Bytes relayed through upgraded tunnels"
    );
    ::metrics::describe_counter!(
        "tap_observations_dropped_total",
        "Observations discarded because the exchange log fell behind"
    );

    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// Record a finished exchange. `status` 0 means no response was produced.
pub fn record_exchange(method: &str, status: u16, duration: Duration) {
    ::metrics::counter!(
        "tap_exchanges_total",
        "method" => method_label(method),
        "status" => status.to_string()
    )
    .increment(1);
    ::metrics::histogram!("tap_exchange_duration_seconds").record(duration.as_secs_f64());
}

/// Label value for a request method.
pub fn method_label(method: &str) -> &'static str {
    match method {
        "GET" => "GET",
        "HEAD" => "HEAD",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        "CONNECT" => "CONNECT",
        "OPTIONS" => "OPTIONS",
        "TRACE" => "TRACE",
        "PATCH" => "PATCH",
        _ => "OTHER",
    }
}

pub fn record_session_error(stage: &'static str) {
    ::metrics::counter!("tap_session_errors_total", "stage" => stage).increment(1);
}

pub fn session_opened() {
    ::metrics::gauge!("tap_active_sessions").increment(1.0);
}

pub fn session_closed() {
    ::metrics::gauge!("tap_active_sessions").decrement(1.0);
}

pub fn record_tunnel_bytes(upstream: u64, downstream: u64) {
    ::metrics::counter!("tap_tunnel_bytes_total", "direction" => "upstream").increment(upstream);
    ::metrics::counter!("tap_tunnel_bytes_total", "direction" => "downstream")
        .increment(downstream);
}

pub fn record_dropped_observation() {
    ::metrics::counter!("tap_observations_dropped_total").increment(1);
}
