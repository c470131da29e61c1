//! Per-session HTTP forwarding.
//!
//! # Responsibilities
//! - Parse requests off one client connection (HTTP/1.x, keep-alive)
//! - Relay each request to the upstream over the session's own connection
//! - Redact and capture each exchange and emit it for observation
//! - Hand both streams to the tunnel after a successful upgrade
//!
//! # State Machine
//! ```text
//! Http ──(101 + Upgrade on an upgrade request)──▶ Tunneling
//! ```
//! There is no way back: once tunneling, hyper stops parsing and the tunnel
//! owns both streams.

use std::convert::Infallible;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::client::conn::http1::SendRequest;
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::http::body::{CaptureBody, Captured};
use crate::http::websocket;
use crate::net::upstream::UpstreamError;
use crate::net::{Session, SessionGuard, SessionPermit, Transport, Upstream};
use crate::observability::{metrics, Exchange, Observation, Observer};
use crate::security::headers::header_pairs;
use crate::security::RedactionPolicy;

/// Body type returned to the client.
pub type TapBody = UnsyncBoxBody<Bytes, hyper::Error>;

type UpstreamSender = SendRequest<CaptureBody<Incoming>>;

/// Read-only state shared by every session.
pub struct TapState {
    pub upstream: Upstream,
    pub redaction: RedactionPolicy,
    /// Bytes retained per body direction; `None` disables capture.
    pub capture_limit: Option<usize>,
    pub max_header_bytes: usize,
    pub observer: Observer,
}

/// Keeps a session counted while any part of it (HTTP or tunnel) is alive.
#[derive(Debug)]
pub struct SessionHold {
    pub guard: SessionGuard,
    pub permit: SessionPermit,
}

#[derive(Debug, Error)]
enum ForwardError {
    #[error(transparent)]
    Connect(#[from] UpstreamError),

    #[error("upstream HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("upstream switched protocols without an upgrade request")]
    UnexpectedUpgrade,

    #[error("session is already tunneling")]
    Tunneling,
}

/// Protocol phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    Http = 0,
    Tunneling = 1,
}

#[derive(Debug)]
struct PhaseCell(AtomicU8);

impl PhaseCell {
    fn new() -> Self {
        Self(AtomicU8::new(SessionPhase::Http as u8))
    }

    fn get(&self) -> SessionPhase {
        match self.0.load(Ordering::Acquire) {
            0 => SessionPhase::Http,
            _ => SessionPhase::Tunneling,
        }
    }

    /// One-way transition. Returns false if already tunneling.
    fn enter_tunnel(&self) -> bool {
        self.0
            .compare_exchange(
                SessionPhase::Http as u8,
                SessionPhase::Tunneling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Everything known about an exchange before its bodies finish.
struct PendingExchange {
    exchange: Exchange,
    started: Instant,
}

struct SessionContext {
    state: Arc<TapState>,
    session: Session,
    hold: Arc<SessionHold>,
    upstream: Mutex<Option<UpstreamSender>>,
    phase: PhaseCell,
}

/// Serve one client connection until it closes or upgrades.
pub async fn serve(
    state: Arc<TapState>,
    session: Session,
    io: Transport,
    hold: Arc<SessionHold>,
) -> Result<(), hyper::Error> {
    let max_header_bytes = state.max_header_bytes;
    let ctx = Arc::new(SessionContext {
        state,
        session,
        hold,
        upstream: Mutex::new(None),
        phase: PhaseCell::new(),
    });

    tracing::debug!(
        session = %ctx.session.id,
        peer = %ctx.session.peer,
        transport = %ctx.session.kind,
        "Session started"
    );

    let service_ctx = Arc::clone(&ctx);
    let service = service_fn(move |req| {
        let ctx = Arc::clone(&service_ctx);
        async move { Ok::<_, Infallible>(ctx.handle(req).await) }
    });

    let result = hyper::server::conn::http1::Builder::new()
        .preserve_header_case(true)
        .max_buf_size(max_header_bytes)
        .serve_connection(TokioIo::new(io), service)
        .with_upgrades()
        .await;

    tracing::debug!(
        session = %ctx.session.id,
        phase = ?ctx.phase.get(),
        "Session finished"
    );
    result
}

impl SessionContext {
    async fn handle(self: Arc<Self>, mut req: Request<Incoming>) -> Response<TapBody> {
        let started = Instant::now();
        let path = req.uri().path().to_string();
        self.state
            .observer
            .aggregator()
            .record(req.method().as_str(), &path);

        let mut pending = PendingExchange {
            exchange: Exchange {
                id: Uuid::new_v4(),
                session: self.session.id.as_u64(),
                peer: self.session.peer,
                transport: self.session.kind,
                method: req.method().to_string(),
                path,
                query: req.uri().query().map(str::to_string),
                version: format!("{:?}", req.version()),
                status: None,
                request_headers: header_pairs(&self.state.redaction.redact(req.headers())),
                response_headers: Vec::new(),
                request_body: None,
                response_body: None,
                started_at: now_rfc3339(),
                duration: Default::default(),
                upgrade: false,
                error: None,
            },
            started,
        };

        if self.phase.get() == SessionPhase::Tunneling {
            return self.bad_gateway(pending, None, ForwardError::Tunneling);
        }

        let downstream_upgrade = is_upgrade_request(&req).then(|| hyper::upgrade::on(&mut req));
        let (req, request_capture) = self.upstream_request(req);

        let response = match self.send(req).await {
            Ok(response) => response,
            Err(e) => return self.bad_gateway(pending, Some(request_capture), e),
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            let downstream = match downstream_upgrade {
                Some(on) if response.headers().contains_key(UPGRADE) => on,
                _ => {
                    return self.bad_gateway(
                        pending,
                        Some(request_capture),
                        ForwardError::UnexpectedUpgrade,
                    )
                }
            };
            if !self.phase.enter_tunnel() {
                return self.bad_gateway(pending, Some(request_capture), ForwardError::Tunneling);
            }
            return self.start_tunnel(pending, request_capture, downstream, response);
        }

        pending.exchange.status = Some(response.status().as_u16());
        pending.exchange.response_headers =
            header_pairs(&self.state.redaction.redact(response.headers()));

        let (parts, body) = response.into_parts();
        let (body, response_capture) = CaptureBody::new(body, self.state.capture_limit);
        tokio::spawn(finalize(
            self.state.observer.clone(),
            pending,
            request_capture,
            Some(response_capture),
        ));

        Response::from_parts(parts, body.boxed_unsync())
    }

    /// Rewrite a client request for the upstream: origin-form target,
    /// optional Host override, everything else verbatim.
    fn upstream_request(
        &self,
        req: Request<Incoming>,
    ) -> (Request<CaptureBody<Incoming>>, oneshot::Receiver<Captured>) {
        let (mut parts, body) = req.into_parts();

        if parts.uri.scheme().is_some() || parts.uri.authority().is_some() {
            let origin = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            parts.uri = Uri::try_from(origin).unwrap_or_else(|_| Uri::from_static("/"));
        }

        if let Some(host) = self.state.upstream.host_header() {
            match HeaderValue::from_str(host) {
                Ok(value) => {
                    parts.headers.insert(HOST, value);
                }
                Err(_) => tracing::warn!(host, "Host override is not a valid header value"),
            }
        }
        parts.extensions.remove::<OnUpgrade>();

        let (body, capture) = CaptureBody::new(body, self.state.capture_limit);
        (Request::from_parts(parts, body), capture)
    }

    /// Send on the session's upstream connection, opening it on first use
    /// and again if the upstream closed it between exchanges.
    async fn send(
        &self,
        req: Request<CaptureBody<Incoming>>,
    ) -> Result<Response<Incoming>, ForwardError> {
        let mut slot = self.upstream.lock().await;
        let sender = match slot.take() {
            Some(sender) if !sender.is_closed() => slot.insert(sender),
            _ => slot.insert(self.connect().await?),
        };

        sender.ready().await?;
        Ok(sender.send_request(req).await?)
    }

    async fn connect(&self) -> Result<UpstreamSender, ForwardError> {
        let transport = self.state.upstream.connect().await?;
        let (sender, conn) = hyper::client::conn::http1::Builder::new()
            .preserve_header_case(true)
            .handshake(TokioIo::new(transport))
            .await?;

        let session = self.session.id;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(session = %session, error = %e, "Upstream connection ended");
            }
        });

        tracing::debug!(
            session = %session,
            upstream = %self.state.upstream.target(),
            "Upstream connection opened"
        );
        Ok(sender)
    }

    fn start_tunnel(
        &self,
        mut pending: PendingExchange,
        request_capture: oneshot::Receiver<Captured>,
        downstream: OnUpgrade,
        mut response: Response<Incoming>,
    ) -> Response<TapBody> {
        let upstream = hyper::upgrade::on(&mut response);

        pending.exchange.status = Some(StatusCode::SWITCHING_PROTOCOLS.as_u16());
        pending.exchange.upgrade = true;
        pending.exchange.response_headers =
            header_pairs(&self.state.redaction.redact(response.headers()));

        tracing::debug!(
            session = %self.session.id,
            path = %pending.exchange.path,
            "Upgrade accepted, switching to tunnel"
        );

        tokio::spawn(finalize(
            self.state.observer.clone(),
            pending,
            request_capture,
            None,
        ));
        tokio::spawn(websocket::run(
            downstream,
            upstream,
            self.session.clone(),
            self.state.observer.clone(),
            Arc::clone(&self.hold),
        ));

        response.map(|_| empty())
    }

    fn bad_gateway(
        &self,
        mut pending: PendingExchange,
        request_capture: Option<oneshot::Receiver<Captured>>,
        error: ForwardError,
    ) -> Response<TapBody> {
        tracing::warn!(
            session = %self.session.id,
            method = %pending.exchange.method,
            path = %pending.exchange.path,
            error = %error,
            "Upstream exchange failed"
        );
        metrics::record_session_error("upstream");

        let mut response = Response::new(full(format!("bad gateway: {error}\n")));
        *response.status_mut() = StatusCode::BAD_GATEWAY;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));

        pending.exchange.status = Some(StatusCode::BAD_GATEWAY.as_u16());
        pending.exchange.response_headers = header_pairs(response.headers());
        pending.exchange.error = Some(error.to_string());

        match request_capture {
            Some(rx) => {
                tokio::spawn(finalize(self.state.observer.clone(), pending, rx, None));
            }
            None => {
                pending.exchange.duration = pending.started.elapsed();
                self.state
                    .observer
                    .emit(Observation::Exchange(Box::new(pending.exchange)));
            }
        }
        response
    }
}

/// Wait for both body reports, then emit the exchange.
async fn finalize(
    observer: Observer,
    mut pending: PendingExchange,
    request: oneshot::Receiver<Captured>,
    response: Option<oneshot::Receiver<Captured>>,
) {
    let request = request.await.ok();
    let response = match response {
        Some(rx) => rx.await.ok(),
        None => None,
    };

    let mut finished = pending.started;
    for captured in [&request, &response].into_iter().flatten() {
        finished = finished.max(captured.finished_at);
        if pending.exchange.error.is_none() {
            pending.exchange.error = captured.error.clone();
        }
    }
    pending.exchange.duration = finished.saturating_duration_since(pending.started);
    pending.exchange.request_body = request.and_then(|c| c.body);
    pending.exchange.response_body = response.and_then(|c| c.body);

    observer.emit(Observation::Exchange(Box::new(pending.exchange)));
}

fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    req.headers().contains_key(UPGRADE)
        && req
            .headers()
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn full(text: String) -> TapBody {
    Full::new(Bytes::from(text))
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn empty() -> TapBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_transition_is_one_way() {
        let phase = PhaseCell::new();
        assert_eq!(phase.get(), SessionPhase::Http);
        assert!(phase.enter_tunnel());
        assert_eq!(phase.get(), SessionPhase::Tunneling);
        assert!(!phase.enter_tunnel());
        assert_eq!(phase.get(), SessionPhase::Tunneling);
    }

    #[test]
    fn upgrade_request_needs_both_headers() {
        let req = Request::builder()
            .header(UPGRADE, "websocket")
            .header(CONNECTION, "keep-alive, Upgrade")
            .body(())
            .unwrap();
        assert!(is_upgrade_request(&req));

        let no_connection = Request::builder()
            .header(UPGRADE, "websocket")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&no_connection));

        let plain = Request::builder()
            .header(CONNECTION, "upgrade")
            .body(())
            .unwrap();
        assert!(!is_upgrade_request(&plain));
    }
}
