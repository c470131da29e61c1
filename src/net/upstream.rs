//! Upstream target resolution and connection.
//!
//! # Responsibilities
//! - Parse the configured target once at startup into a [`TargetDescriptor`]
//! - Open a fresh transport (plain or TLS) per session
//! - Bound connect and handshake time so a dead upstream cannot hang a session
//!
//! # Design Decisions
//! - Port 443 or an explicit `https://` scheme implies TLS
//! - No pooling: each session owns its upstream connection

use std::time::Duration;

use rustls::pki_types::ServerName;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::net::tls::{self, TlsError, UpstreamTlsOptions, Verification};
use crate::net::transport::Transport;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("unsupported scheme '{0}' (expected http or https)")]
    Scheme(String),

    #[error("missing host")]
    MissingHost,

    #[error("{0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("upstream TLS: {0}")]
    Tls(#[from] TlsError),
}

/// Wire scheme of the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

/// Resolved upstream: where to connect and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
}

impl TargetDescriptor {
    /// Parse `host:port`, a bare host/address, or an `http(s)://` URL.
    pub fn parse(target: &str) -> Result<Self, TargetError> {
        let target = target.trim();
        let url = if target.contains("://") {
            Url::parse(target)?
        } else {
            Url::parse(&format!("http://{target}"))?
        };

        let host = match url.host() {
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            Some(host) => host.to_string(),
            None => return Err(TargetError::MissingHost),
        };

        let (scheme, port) = match url.scheme() {
            "http" => {
                let port = url.port().unwrap_or(80);
                let scheme = if port == 443 { Scheme::Https } else { Scheme::Http };
                (scheme, port)
            }
            "https" => (Scheme::Https, url.port().unwrap_or(443)),
            other => return Err(TargetError::Scheme(other.to_string())),
        };

        if url.path() != "/" || url.query().is_some() {
            tracing::warn!(target, "Ignoring path and query in upstream target");
        }

        Ok(Self { host, port, scheme })
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }

    /// `host:port` as written in a Host header or log line.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.scheme {
            Scheme::Http => "http",
            Scheme::Https => "https",
        };
        write!(f, "{}://{}", scheme, self.authority())
    }
}

/// Opens connections to the configured target.
#[derive(Clone)]
pub struct Upstream {
    target: TargetDescriptor,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    verification: Verification,
    host_header: Option<String>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl Upstream {
    /// Resolve the target and prepare TLS once, at startup.
    pub fn from_config(
        config: &UpstreamConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, StartupUpstreamError> {
        let target = TargetDescriptor::parse(&config.target)?;
        let verification = if config.insecure {
            Verification::Insecure
        } else {
            Verification::Verify
        };

        let tls = if target.is_tls() {
            let connector = tls::upstream_connector(&UpstreamTlsOptions {
                verification,
                extra_roots: config.ca_paths.clone(),
                client_cert: config.client_cert.clone(),
                client_key: config.client_key.clone(),
            })?;
            let name = config.server_name.as_deref().unwrap_or(&target.host);
            Some((connector, tls::server_name(name)?))
        } else {
            None
        };

        Ok(Self {
            target,
            tls,
            verification,
            host_header: config.host_header.clone(),
            connect_timeout: Duration::from_secs(timeouts.connect_secs),
            handshake_timeout: Duration::from_secs(timeouts.handshake_secs),
        })
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn verification(&self) -> Verification {
        self.verification
    }

    /// Host header override, if configured.
    pub fn host_header(&self) -> Option<&str> {
        self.host_header.as_deref()
    }

    /// Open a new transport to the target.
    pub async fn connect(&self) -> Result<Transport, UpstreamError> {
        let addr = self.target.authority();
        let tcp = match tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.target.host.as_str(), self.target.port)),
        )
        .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(source)) => return Err(UpstreamError::Connect { addr, source }),
            Err(_) => {
                return Err(UpstreamError::ConnectTimeout {
                    addr,
                    timeout: self.connect_timeout,
                })
            }
        };
        let _ = tcp.set_nodelay(true);

        match &self.tls {
            None => Ok(Transport::Plain(tcp)),
            Some((connector, name)) => {
                let stream =
                    tls::connect(connector, name.clone(), tcp, self.handshake_timeout).await?;
                tracing::debug!(upstream = %self.target, "Upstream TLS established");
                Ok(Transport::TlsClient(Box::new(stream)))
            }
        }
    }
}

/// Fatal problems preparing the upstream at startup.
#[derive(Debug, Error)]
pub enum StartupUpstreamError {
    #[error("invalid upstream target: {0}")]
    Target(#[from] TargetError),

    #[error(transparent)]
    Tls(#[from] TlsError),
}
