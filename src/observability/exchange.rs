//! Records surfaced to the observation path.
//!
//! Everything in here has already been through the redaction and capture
//! policy. Nothing downstream of an [`Observer`] ever sees raw header values.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::net::TransportKind;
use crate::observability::aggregator::Aggregator;
use crate::observability::metrics;

/// One request/response pair within a session.
#[derive(Debug, Clone, Serialize)]
pub struct Exchange {
    pub id: Uuid,
    pub session: u64,
    pub peer: SocketAddr,
    pub transport: TransportKind,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub version: String,
    /// Status relayed to the client; `None` if the client went away first.
    pub status: Option<u16>,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<CapturedBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<CapturedBody>,
    pub started_at: String,
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
    pub upgrade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Exchange {
    /// Request line as written on the wire, origin-form.
    pub fn target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Retained prefix of one body direction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CapturedBody {
    #[serde(serialize_with = "lossy_utf8")]
    pub data: Bytes,
    pub total_bytes: u64,
    pub truncated: bool,
    /// False when the stream errored or was dropped before its end.
    pub complete: bool,
}

/// Everything the tap reports.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Exchange(Box<Exchange>),
    SessionError {
        session: u64,
        peer: SocketAddr,
        stage: &'static str,
        error: String,
    },
    TunnelClosed {
        session: u64,
        peer: SocketAddr,
        bytes_upstream: u64,
        bytes_downstream: u64,
        #[serde(serialize_with = "as_millis")]
        duration: Duration,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Observations queued for the exchange log before new ones are dropped.
///
/// Each one may hold two captured bodies, so a stalled stdout must not
/// grow this without bound.
pub const OBSERVATION_BUFFER: usize = 1024;

/// Shared count of observations the exchange log never received.
#[derive(Debug, Clone, Default)]
pub struct DropCount(Arc<AtomicU64>);

impl DropCount {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns the count before this drop.
    fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Sink for observations: updates metrics and forwards to the exchange log.
#[derive(Debug, Clone)]
pub struct Observer {
    aggregator: Aggregator,
    tx: Option<mpsc::Sender<Observation>>,
    dropped: DropCount,
}

impl Observer {
    pub fn new(aggregator: Aggregator, tx: Option<mpsc::Sender<Observation>>) -> Self {
        Self {
            aggregator,
            tx,
            dropped: DropCount::default(),
        }
    }

    /// Observer with a fresh [`OBSERVATION_BUFFER`]-deep channel.
    pub fn channel(aggregator: Aggregator) -> (Self, mpsc::Receiver<Observation>) {
        Self::with_capacity(aggregator, OBSERVATION_BUFFER)
    }

    pub fn with_capacity(
        aggregator: Aggregator,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Observation>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(aggregator, Some(tx)), rx)
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Observations discarded because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    /// Handle on the drop count that does not keep the channel open.
    pub fn drop_count(&self) -> DropCount {
        self.dropped.clone()
    }

    /// Never blocks: a full log loses the observation, not the session.
    pub fn emit(&self, observation: Observation) {
        match &observation {
            Observation::Exchange(exchange) => {
                metrics::record_exchange(
                    &exchange.method,
                    exchange.status.unwrap_or(0),
                    exchange.duration,
                );
            }
            Observation::SessionError { stage, .. } => metrics::record_session_error(*stage),
            Observation::TunnelClosed {
                bytes_upstream,
                bytes_downstream,
                ..
            } => metrics::record_tunnel_bytes(*bytes_upstream, *bytes_downstream),
        }

        let Some(tx) = &self.tx else { return };
        match tx.try_send(observation) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                if self.dropped.bump() == 0 {
                    tracing::warn!("Exchange log is falling behind, dropping observations");
                }
                metrics::record_dropped_observation();
            }
            // Receiver gone means the log task has stopped; nothing else to do.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

fn lossy_utf8<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(data))
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_micros() as f64 / 1000.0)
}
