//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions produce:
//!     → aggregator.rs (record(method, path) at request head)
//!     → exchange.rs Observer::emit (Exchange / SessionError / TunnelClosed)
//!         → metrics.rs (counters, gauges, histograms)
//!         → channel → logging.rs exchange log (stdout, text or JSON)
//!
//! Consumers:
//!     → dashboard (Aggregator snapshots on a timer)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → tracing diagnostics (stderr or file)
//! ```
//!
//! # Design Decisions
//! - Observations are fully redacted before they enter the channel
//! - Metrics are cheap (atomic increments) and always recorded

pub mod aggregator;
pub mod exchange;
pub mod logging;
pub mod metrics;

pub use aggregator::{Aggregator, Entry, RouteKey};
pub use exchange::{CapturedBody, DropCount, Exchange, Observation, Observer};
