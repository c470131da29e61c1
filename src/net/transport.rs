//! Uniform byte stream over plain TCP or TLS.
//!
//! # Responsibilities
//! - Hide whether a connection is plaintext or TLS-wrapped
//! - Classify a freshly accepted socket by peeking its first byte
//!
//! # Design Decisions
//! - The kind is chosen once at connection setup; callers never branch on it
//! - Classification peeks, so the bytes are still there for the real parser

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Which wrapping a transport has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Plain,
    Tls,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Plain => f.write_str("plain"),
            TransportKind::Tls => f.write_str("tls"),
        }
    }
}

/// What the first byte of an inbound connection looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// A TLS ClientHello is starting.
    Tls,
    /// Anything else; handed to the HTTP parser.
    Plain,
    /// The peer closed before sending anything.
    Closed,
}

/// Peek at the first byte without consuming it.
pub async fn classify(stream: &TcpStream) -> io::Result<Inbound> {
    let mut first = [0u8; 1];
    let n = stream.peek(&mut first).await?;
    Ok(match n {
        0 => Inbound::Closed,
        _ if first[0] == TLS_HANDSHAKE_RECORD => Inbound::Tls,
        _ => Inbound::Plain,
    })
}

/// A connected byte stream, on either the listening or the upstream side.
pub enum Transport {
    Plain(TcpStream),
    TlsServer(Box<tokio_rustls::server::TlsStream<TcpStream>>),
    TlsClient(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::Plain(_) => TransportKind::Plain,
            Transport::TlsServer(_) | Transport::TlsClient(_) => TransportKind::Tls,
        }
    }

    /// The underlying TCP socket.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::TlsServer(s) => s.get_ref().0,
            Transport::TlsClient(s) => s.get_ref().0,
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind())
            .field("peer", &self.tcp().peer_addr().ok())
            .finish()
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Transport::TlsServer(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
            Transport::TlsClient(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Transport::TlsServer(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
            Transport::TlsClient(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Transport::TlsServer(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
            Transport::TlsClient(s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Transport::Plain(s) => s.is_write_vectored(),
            Transport::TlsServer(s) => s.is_write_vectored(),
            Transport::TlsClient(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            Transport::TlsServer(s) => Pin::new(s.as_mut()).poll_flush(cx),
            Transport::TlsClient(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Transport::TlsServer(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
            Transport::TlsClient(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn classifies_tls_record_without_consuming() {
        let (mut client, server) = pair().await;
        client.write_all(&[0x16, 0x03, 0x01]).await.unwrap();

        assert_eq!(classify(&server).await.unwrap(), Inbound::Tls);

        let mut transport = Transport::Plain(server);
        let mut buf = [0u8; 3];
        transport.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x16, 0x03, 0x01]);
    }

    #[tokio::test]
    async fn classifies_http_as_plain() {
        let (mut client, server) = pair().await;
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        assert_eq!(classify(&server).await.unwrap(), Inbound::Plain);
    }

    #[tokio::test]
    async fn classifies_immediate_close() {
        let (client, server) = pair().await;
        drop(client);
        assert_eq!(classify(&server).await.unwrap(), Inbound::Closed);
    }

    #[tokio::test]
    async fn plain_transport_round_trips_bytes() {
        let (client, server) = pair().await;
        let mut a = Transport::Plain(client);
        let mut b = Transport::Plain(server);
        assert_eq!(a.kind(), TransportKind::Plain);

        a.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
