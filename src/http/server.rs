//! Tap server: accept loop and per-session tasks.
//!
//! # Responsibilities
//! - Prepare identity, TLS acceptor, upstream and redaction policy at startup
//! - Accept connections until shutdown, one task per session
//! - Classify each connection (TLS or plain) before handing it to HTTP
//! - Report per-session failures without touching the accept loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::config::TapConfig;
use crate::http::session::{self, SessionHold, TapState};
use crate::lifecycle::StopSignal;
use crate::net::identity::{Identity, IdentityError};
use crate::net::listener::{Listener, ListenerError, SessionPermit};
use crate::net::tls::{self, TlsError};
use crate::net::transport::{self, Inbound, Transport};
use crate::net::upstream::{StartupUpstreamError, Upstream};
use crate::net::{Session, SessionTracker};
use crate::observability::{Observation, Observer};
use crate::security::RedactionPolicy;

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listener identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("listener TLS: {0}")]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Upstream(#[from] StartupUpstreamError),
}

/// The tap: everything needed to serve sessions.
pub struct TapServer {
    state: Arc<TapState>,
    acceptor: Option<TlsAcceptor>,
    tracker: SessionTracker,
    handshake_timeout: Duration,
}

impl TapServer {
    /// Build the server from validated configuration.
    pub fn new(config: &TapConfig, observer: Observer) -> Result<Self, ServerError> {
        let acceptor = if config.tls_listening() {
            let identity = match &config.listener.tls {
                Some(files) => Identity::from_pem_files(&files.cert_path, &files.key_path)?,
                None => Identity::self_signed()?,
            };
            Some(tls::server_acceptor(identity)?)
        } else {
            None
        };

        let upstream = Upstream::from_config(&config.upstream, &config.timeouts)?;
        let redaction = RedactionPolicy::new(&config.capture.redact_headers);
        let capture_limit = config
            .capture
            .include_bodies
            .then_some(config.capture.max_body_bytes);

        tracing::info!(
            upstream = %upstream.target(),
            verification = ?upstream.verification(),
            tls_listening = acceptor.is_some(),
            capture_limit = ?capture_limit,
            redacted = ?redaction.names(),
            "Tap configured"
        );

        Ok(Self {
            state: Arc::new(TapState {
                upstream,
                redaction,
                capture_limit,
                max_header_bytes: config.listener.max_header_bytes,
                observer,
            }),
            acceptor,
            tracker: SessionTracker::new(),
            handshake_timeout: Duration::from_secs(config.timeouts.handshake_secs),
        })
    }

    /// Live-session tracker, for draining at shutdown.
    pub fn tracker(&self) -> SessionTracker {
        self.tracker.clone()
    }

    /// Accept until `shutdown` fires. In-flight sessions are left running.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: StopSignal,
    ) -> Result<(), ListenerError> {
        let local = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %local, upstream = %self.state.upstream.target(), "Tap listening");

        loop {
            tokio::select! {
                _ = shutdown.stopped() => {
                    tracing::info!("Stopped accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_session(stream, peer, local, permit),
                    Err(ListenerError::Accept(e)) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(())
    }

    fn spawn_session(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        listen_addr: SocketAddr,
        permit: SessionPermit,
    ) {
        let state = Arc::clone(&self.state);
        let acceptor = self.acceptor.clone();
        let guard = self.tracker.track();
        let handshake_timeout = self.handshake_timeout;
        let local = stream.local_addr().unwrap_or(listen_addr);

        tokio::spawn(run_session(
            state,
            acceptor,
            SessionHold { guard, permit },
            stream,
            local,
            peer,
            handshake_timeout,
        ));
    }
}

async fn run_session(
    state: Arc<TapState>,
    acceptor: Option<TlsAcceptor>,
    hold: SessionHold,
    stream: TcpStream,
    local: SocketAddr,
    peer: SocketAddr,
    handshake_timeout: Duration,
) {
    let id = hold.guard.id();
    let report = |stage: &'static str, error: String| {
        tracing::debug!(session = %id, peer = %peer, stage, error = %error, "Session error");
        state.observer.emit(Observation::SessionError {
            session: id.as_u64(),
            peer,
            stage,
            error,
        });
    };

    let inbound = match tokio::time::timeout(handshake_timeout, transport::classify(&stream)).await
    {
        Ok(Ok(inbound)) => inbound,
        Ok(Err(e)) => return report("classify", e.to_string()),
        Err(_) => return report("classify", format!("no data within {handshake_timeout:?}")),
    };

    let transport = match (inbound, &acceptor) {
        (Inbound::Closed, _) => {
            tracing::trace!(session = %id, peer = %peer, "Closed before sending data");
            return;
        }
        (Inbound::Plain, _) => Transport::Plain(stream),
        (Inbound::Tls, Some(acceptor)) => {
            match tls::accept(acceptor, stream, handshake_timeout).await {
                Ok(tls) => Transport::TlsServer(Box::new(tls)),
                Err(e) => return report("tls-handshake", e.to_string()),
            }
        }
        (Inbound::Tls, None) => {
            return report(
                "classify",
                "TLS ClientHello on a listener without TLS identity".to_string(),
            )
        }
    };

    let session = Session::new(id, local, peer, transport.kind());
    if let Err(e) = session::serve(Arc::clone(&state), session, transport, Arc::new(hold)).await {
        report("http", e.to_string());
    }
}
