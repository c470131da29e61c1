//! Shared utilities for integration testing.
//!
//! Backends bind `127.0.0.1:0` so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{AUTHORIZATION, HOST};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use http_tap::config::TapConfig;
use http_tap::net::identity::Identity;
use http_tap::net::{tls, Listener};
use http_tap::observability::{Exchange, Observation};
use http_tap::{Aggregator, Observer, Shutdown, TapServer};

/// A running tap under test.
pub struct Tap {
    pub addr: SocketAddr,
    pub observations: mpsc::Receiver<Observation>,
    pub aggregator: Aggregator,
    pub shutdown: Shutdown,
}

impl Tap {
    /// Next observation, or panic after a few seconds.
    pub async fn next(&mut self) -> Observation {
        tokio::time::timeout(Duration::from_secs(5), self.observations.recv())
            .await
            .expect("timed out waiting for an observation")
            .expect("observation channel closed")
    }

    /// Next exchange, skipping other observations.
    pub async fn next_exchange(&mut self) -> Exchange {
        loop {
            if let Observation::Exchange(exchange) = self.next().await {
                return *exchange;
            }
        }
    }

    /// True if nothing is observed within `wait`.
    pub async fn quiet_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.observations.recv())
            .await
            .is_err()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start a tap forwarding to `target` with otherwise default settings.
pub async fn start_tap_to(target: SocketAddr) -> Tap {
    let mut config = TapConfig::default();
    config.upstream.target = target.to_string();
    start_tap(config).await
}

/// Start a tap on an ephemeral port.
pub async fn start_tap(mut config: TapConfig) -> Tap {
    config.listener.bind_address = "127.0.0.1:0".to_string();

    let aggregator = Aggregator::new();
    let (observer, observations) = Observer::channel(aggregator.clone());
    let server = TapServer::new(&config, observer).unwrap();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });

    Tap {
        addr,
        observations,
        aggregator,
        shutdown,
    }
}

/// HTTP client that never goes through an environment proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Echo backend.
///
/// Replies with `"{METHOD} {target}\n"` followed by the request body.
/// `/status/NNN` answers with that status. The received Host and
/// Authorization values come back as `x-echo-host` / `x-echo-authorization`,
/// and every response sets a cookie.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_echo(stream));
        }
    });
    addr
}

/// Echo backend behind TLS with a self-signed certificate.
pub async fn start_tls_echo_backend() -> SocketAddr {
    let acceptor = tls::server_acceptor(Identity::self_signed().unwrap()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                if let Ok(tls) = acceptor.accept(stream).await {
                    serve_echo(tls).await;
                }
            });
        }
    });
    addr
}

async fn serve_echo<S>(stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let _ = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service_fn(echo))
        .await;
}

async fn echo(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let header = |name| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let host = header(HOST);
    let authorization = header(AUTHORIZATION);
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.to_string())
        .unwrap_or_default();
    let status = target
        .strip_prefix("/status/")
        .and_then(|code| code.parse::<u16>().ok())
        .unwrap_or(200);

    let mut text = format!("{} {}\n", req.method(), target).into_bytes();
    let body = req.into_body().collect().await?.to_bytes();
    text.extend_from_slice(&body);

    Ok(Response::builder()
        .status(status)
        .header("x-echo-host", host)
        .header("x-echo-authorization", authorization)
        .header("set-cookie", "session=backend-secret")
        .body(Full::new(Bytes::from(text)))
        .unwrap())
}

/// Backend that answers any request with `101` and then echoes raw bytes.
pub async fn start_raw_upgrade_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut stream).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 101 Switching Protocols\r\n\
                          Connection: Upgrade\r\n\
                          Upgrade: raw-echo\r\n\r\n",
                    )
                    .await;
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// Backend that switches to 101 on every request, upgrade asked for or not.
pub async fn start_rogue_upgrade_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_head(&mut stream).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: surprise\r\n\r\n")
                    .await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            });
        }
    });
    addr
}

/// WebSocket echo backend.
pub async fn start_websocket_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_text() || msg.is_binary() {
                        if ws.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Read until the end of an HTTP head and return it.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

/// Look up a captured header by name.
pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}
