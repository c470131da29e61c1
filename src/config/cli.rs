//! Command-line flags.
//!
//! Every flag is an override on top of the optional config file, so unset
//! flags leave the file (or the built-in default) alone.

use std::path::PathBuf;

use clap::{Parser, ValueHint};

use crate::config::schema::{LogFormat, TapConfig, TlsConfig};

#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "http-tap",
    about = "Listen on a port and proxy to a target, recording HTTP requests/responses.",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// TOML configuration file; flags below override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., 127.0.0.1:8888)
    #[arg(long, value_hint = ValueHint::Other)]
    pub listen: Option<String>,

    /// Target to forward to (host:port or URL; port 443 or https:// means TLS)
    #[arg(long, value_hint = ValueHint::Url)]
    pub target: Option<String>,

    /// Capture request/response bodies (truncated by --max-body-bytes)
    #[arg(long)]
    pub include_bodies: bool,

    /// Maximum number of body bytes retained per message
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Header names to redact (comma separated or repeatable)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub redact_header: Option<Vec<String>>,

    /// Certificate (PEM) for TLS on the listening port
    #[arg(long, value_hint = ValueHint::FilePath, requires = "listen_tls_key")]
    pub listen_tls_cert: Option<PathBuf>,

    /// Private key (PEM) for --listen-tls-cert
    #[arg(long, value_hint = ValueHint::FilePath, requires = "listen_tls_cert")]
    pub listen_tls_key: Option<PathBuf>,

    /// Serve TLS with an in-memory self-signed certificate (dev only)
    #[arg(long)]
    pub listen_self_signed: bool,

    /// Disable certificate and hostname verification for upstream TLS
    #[arg(long, short = 'k')]
    pub insecure_upstream: bool,

    /// Extra CA bundle(s) for upstream verification (PEM)
    #[arg(long, value_hint = ValueHint::FilePath, value_delimiter = ',', num_args = 1..)]
    pub upstream_ca: Vec<PathBuf>,

    /// Client certificate (PEM) for upstream mTLS
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub upstream_client_cert: Option<PathBuf>,

    /// Client private key (PEM) for upstream mTLS
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub upstream_client_key: Option<PathBuf>,

    /// Override SNI/verification name for upstream TLS
    #[arg(long)]
    pub upstream_server_name: Option<String>,

    /// Override the Host header sent upstream
    #[arg(long)]
    pub upstream_host: Option<String>,

    /// Show a live table of paths, method counts and last-seen times
    #[arg(long)]
    pub tui: bool,

    /// Log layout
    #[arg(long, value_enum, ignore_case = true)]
    pub log_format: Option<LogFormat>,

    /// Write diagnostics to a file
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<String>,
}

impl Cli {
    /// Apply the flags that were given on top of `config`.
    pub fn apply(&self, config: &mut TapConfig) {
        if let Some(listen) = &self.listen {
            config.listener.bind_address = listen.clone();
        }
        if let Some(target) = &self.target {
            config.upstream.target = target.clone();
        }
        if self.include_bodies {
            config.capture.include_bodies = true;
        }
        if let Some(max) = self.max_body_bytes {
            config.capture.max_body_bytes = max;
        }
        if let Some(names) = &self.redact_header {
            config.capture.redact_headers = names.clone();
        }
        if let (Some(cert), Some(key)) = (&self.listen_tls_cert, &self.listen_tls_key) {
            config.listener.tls = Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            });
        }
        if self.listen_self_signed {
            config.listener.self_signed = true;
        }
        if self.insecure_upstream {
            config.upstream.insecure = true;
        }
        if !self.upstream_ca.is_empty() {
            config.upstream.ca_paths.extend(self.upstream_ca.iter().cloned());
        }
        if self.upstream_client_cert.is_some() {
            config.upstream.client_cert = self.upstream_client_cert.clone();
        }
        if self.upstream_client_key.is_some() {
            config.upstream.client_key = self.upstream_client_key.clone();
        }
        if self.upstream_server_name.is_some() {
            config.upstream.server_name = self.upstream_server_name.clone();
        }
        if self.upstream_host.is_some() {
            config.upstream.host_header = self.upstream_host.clone();
        }
        if self.tui {
            config.observability.dashboard = true;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if self.log_file.is_some() {
            config.observability.log_file = self.log_file.clone();
        }
        if let Some(addr) = &self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr.clone();
        }
    }
}
