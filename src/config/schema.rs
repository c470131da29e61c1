//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tap.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::security::headers::DEFAULT_REDACTED_HEADERS;
use crate::security::limits::DEFAULT_CAPTURE_LIMIT;

/// Root configuration for the tap.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TapConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Where traffic is forwarded to.
    pub upstream: UpstreamConfig,

    /// Body capture and header redaction.
    pub capture: CaptureConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl TapConfig {
    /// True when the listening side must be able to terminate TLS.
    pub fn tls_listening(&self) -> bool {
        self.listener.tls.is_some() || self.listener.self_signed
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8888").
    pub bind_address: String,

    /// Certificate and key files for TLS listening.
    pub tls: Option<TlsConfig>,

    /// Serve TLS with an in-memory self-signed identity.
    pub self_signed: bool,

    /// Maximum concurrent sessions (backpressure).
    pub max_connections: usize,

    /// Largest request head accepted before the session is dropped.
    pub max_header_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8888".to_string(),
            tls: None,
            self_signed: false,
            max_connections: 1024,
            max_header_bytes: 64 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `host:port` or URL. Port 443 or `https://` selects TLS.
    pub target: String,

    /// Skip certificate and hostname verification.
    pub insecure: bool,

    /// Extra trust anchors (PEM bundles).
    pub ca_paths: Vec<PathBuf>,

    /// Client certificate for mutual TLS (PEM).
    pub client_cert: Option<PathBuf>,

    /// Private key for `client_cert` (PEM).
    pub client_key: Option<PathBuf>,

    /// Name used for SNI and verification instead of the target host.
    pub server_name: Option<String>,

    /// Replace the Host header sent upstream.
    pub host_header: Option<String>,
}

/// Body capture and redaction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Retain body prefixes for observation.
    pub include_bodies: bool,

    /// Maximum body bytes retained per direction per exchange.
    pub max_body_bytes: usize,

    /// Header names whose values are replaced before observation.
    pub redact_headers: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            include_bodies: false,
            max_body_bytes: DEFAULT_CAPTURE_LIMIT,
            redact_headers: DEFAULT_REDACTED_HEADERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream TCP connect timeout in seconds.
    pub connect_secs: u64,

    /// Classification and TLS handshake timeout in seconds.
    pub handshake_secs: u64,

    /// How long shutdown waits for in-flight sessions.
    pub drain_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_secs: 10,
            drain_secs: 5,
        }
    }
}

/// Output layout for logs and exchange records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Layout of diagnostics and exchange records.
    pub log_format: LogFormat,

    /// Write diagnostics to this file instead of stderr.
    pub log_file: Option<PathBuf>,

    /// Show the live dashboard instead of exchange log lines.
    pub dashboard: bool,

    /// Dashboard redraw interval in milliseconds.
    pub dashboard_refresh_ms: u64,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_file: None,
            dashboard: false,
            dashboard_refresh_ms: 250,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
