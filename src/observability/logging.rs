//! Structured logging and the exchange log.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber (text or JSON, level, destination)
//! - Render observations for humans or machines
//! - Drain the observation channel to stdout
//!
//! # Design Decisions
//! - Diagnostics go to stderr (or a file) so stdout carries only the exchange log
//! - `RUST_LOG` wins over the configured level
//! - In dashboard mode diagnostics without a log file are discarded, since the
//!   terminal belongs to the dashboard

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, ObservabilityConfig};
use crate::observability::exchange::{CapturedBody, Exchange, Observation};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logging already initialized: {0}")]
    Init(String),
}

/// Install the global subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("http_tap={}", config.log_level)));

    let (writer, ansi) = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None if config.dashboard => (BoxMakeWriter::new(std::io::sink), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

/// Drain `rx` into `out` until every sender is gone.
pub async fn run_exchange_log<W>(
    mut rx: mpsc::Receiver<Observation>,
    format: LogFormat,
    mut out: W,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(observation) = rx.recv().await {
        let rendered = match format {
            LogFormat::Text => render_text(&observation),
            LogFormat::Json => match render_json(&observation) {
                Some(line) => line,
                None => continue,
            },
        };
        if out.write_all(rendered.as_bytes()).await.is_err() || out.flush().await.is_err() {
            tracing::warn!("Exchange log output closed");
            break;
        }
    }
}

/// Spawn [`run_exchange_log`] writing to stdout.
pub fn spawn_exchange_log(
    rx: mpsc::Receiver<Observation>,
    format: LogFormat,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_exchange_log(rx, format, tokio::io::stdout()))
}

/// One JSON object per line.
pub fn render_json(observation: &Observation) -> Option<String> {
    match serde_json::to_string(observation) {
        Ok(mut line) => {
            line.push('\n');
            Some(line)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize observation");
            None
        }
    }
}

/// Human-readable block.
pub fn render_text(observation: &Observation) -> String {
    let mut out = String::new();
    match observation {
        Observation::Exchange(exchange) => write_exchange(&mut out, exchange),
        Observation::SessionError {
            session,
            peer,
            stage,
            error,
        } => {
            let _ = writeln!(out, "\n[session#{session}] {peer} ERROR ({stage}): {error}");
        }
        Observation::TunnelClosed {
            session,
            peer,
            bytes_upstream,
            bytes_downstream,
            duration,
            error,
        } => {
            let _ = write!(
                out,
                "\n[session#{session}] {peer} TUNNEL CLOSED after {}ms: {bytes_upstream} bytes →, {bytes_downstream} bytes ←",
                duration.as_millis()
            );
            if let Some(error) = error {
                let _ = write!(out, " ({error})");
            }
            out.push('\n');
        }
    }
    out
}

fn write_exchange(out: &mut String, exchange: &Exchange) {
    let _ = writeln!(
        out,
        "\n[session#{}] {} REQUEST {} {} {} from {} ({})",
        exchange.session,
        exchange.started_at,
        exchange.method,
        exchange.target(),
        exchange.version,
        exchange.peer,
        exchange.transport
    );
    write_headers(out, "→", &exchange.request_headers);
    if let Some(body) = &exchange.request_body {
        write_body(out, "→", body);
    }

    let status = exchange
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string());
    let _ = write!(
        out,
        "[session#{}] RESPONSE {} in {}ms",
        exchange.session,
        status,
        exchange.duration.as_millis()
    );
    if exchange.upgrade {
        out.push_str(" (upgraded, tunnel follows)");
    }
    out.push('\n');
    write_headers(out, "←", &exchange.response_headers);
    if let Some(body) = &exchange.response_body {
        write_body(out, "←", body);
    }
    if let Some(error) = &exchange.error {
        let _ = writeln!(out, "! error: {error}");
    }
}

fn write_headers(out: &mut String, prefix: &str, headers: &[(String, String)]) {
    for (name, value) in headers {
        let _ = writeln!(out, "{prefix} {name}: {value}");
    }
}

fn write_body(out: &mut String, prefix: &str, body: &CapturedBody) {
    if body.total_bytes == 0 {
        let _ = writeln!(out, "{prefix} <no body>");
        return;
    }
    let printable = String::from_utf8_lossy(&body.data);
    let incomplete = if body.complete { "" } else { ", incomplete" };
    if body.truncated {
        let _ = writeln!(
            out,
            "{prefix} body ({} / {} bytes, truncated{incomplete}):\n{printable}\n…",
            body.data.len(),
            body.total_bytes
        );
    } else {
        let _ = writeln!(
            out,
            "{prefix} body ({} bytes{incomplete}):\n{printable}",
            body.total_bytes
        );
    }
}
