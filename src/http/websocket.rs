//! Byte tunnel for upgraded (WebSocket) sessions.
//!
//! # Responsibilities
//! - Wait for both sides of the upgrade to complete
//! - Copy bytes in both directions concurrently
//! - Close both directions once either side ends
//! - Report byte counts and duration when the tunnel closes
//!
//! # Data Flow
//! ```text
//! Client ←──── opaque bytes ────→ Tap ←──── opaque bytes ────→ Upstream
//! ```
//!
//! # Design Decisions
//! - No frame parsing: WebSocket frames, pings and close frames pass through as bytes
//! - Half-close is not preserved; the first direction to end closes the tunnel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::session::SessionHold;
use crate::net::Session;
use crate::observability::{Observation, Observer};

const COPY_BUFFER: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("upgrade did not complete: {0}")]
    Upgrade(#[from] hyper::Error),

    #[error("tunnel I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Bytes moved through a tunnel.
#[derive(Debug, Default)]
pub struct TunnelStats {
    /// Client to upstream.
    pub upstream: AtomicU64,
    /// Upstream to client.
    pub downstream: AtomicU64,
}

/// Run the tunnel for one session and report when it closes.
pub async fn run(
    downstream: OnUpgrade,
    upstream: OnUpgrade,
    session: Session,
    observer: Observer,
    hold: Arc<SessionHold>,
) {
    let started = Instant::now();
    let stats = TunnelStats::default();

    let result: Result<(), TunnelError> = async {
        let client = downstream.await?;
        let server = upstream.await?;
        pump(TokioIo::new(client), TokioIo::new(server), &stats).await
    }
    .await;

    let bytes_upstream = stats.upstream.load(Ordering::Relaxed);
    let bytes_downstream = stats.downstream.load(Ordering::Relaxed);
    let error = result.err().map(|e| e.to_string());

    tracing::debug!(
        session = %session.id,
        bytes_upstream,
        bytes_downstream,
        error = error.as_deref().unwrap_or(""),
        "Tunnel closed"
    );

    observer.emit(Observation::TunnelClosed {
        session: session.id.as_u64(),
        peer: session.peer,
        bytes_upstream,
        bytes_downstream,
        duration: started.elapsed(),
        error,
    });
    drop(hold);
}

/// Copy both ways until one direction finishes, then shut both writers.
pub async fn pump<C, S>(client: C, server: S, stats: &TunnelStats) -> Result<(), TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut server_read, mut server_write) = tokio::io::split(server);

    let result = tokio::select! {
        r = copy_counting(&mut client_read, &mut server_write, &stats.upstream) => r,
        r = copy_counting(&mut server_read, &mut client_write, &stats.downstream) => r,
    };

    let _ = server_write.shutdown().await;
    let _ = client_write.shutdown().await;
    result.map_err(TunnelError::from)
}

async fn copy_counting<R, W>(reader: &mut R, writer: &mut W, counter: &AtomicU64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        writer.flush().await?;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}
