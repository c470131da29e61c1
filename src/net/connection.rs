//! Session identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Hand out unique session IDs
//! - Describe each accepted connection as a [`Session`]
//! - Count live sessions so shutdown can drain them
//! - Keep the `tap_active_sessions` gauge in step

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;

use crate::net::transport::TransportKind;
use crate::observability::metrics;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One accepted client connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub local: SocketAddr,
    pub peer: SocketAddr,
    pub kind: TransportKind,
    pub created_at: SystemTime,
}

impl Session {
    pub fn new(id: SessionId, local: SocketAddr, peer: SocketAddr, kind: TransportKind) -> Self {
        Self {
            id,
            local,
            peer,
            kind,
            created_at: SystemTime::now(),
        }
    }
}

/// Counts live sessions for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicU64,
    idle: Notify,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live session. The returned guard releases it on drop.
    pub fn track(&self) -> SessionGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        metrics::session_opened();
        SessionGuard {
            inner: Arc::clone(&self.inner),
            id: SessionId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Wait until every session has ended.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with a deadline. Returns false on timeout.
    pub async fn drain(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.wait_idle()).await.is_ok()
    }
}

/// Holds one slot in the tracker for a session's lifetime.
#[derive(Debug)]
pub struct SessionGuard {
    inner: Arc<TrackerInner>,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
        metrics::session_closed();
        tracing::trace!(session = %self.id, "Session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn tracker_counts_guards() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let a = tracker.track();
        let b = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        assert_ne!(a.id(), b.id());

        drop(a);
        assert_eq!(tracker.active_count(), 1);
        drop(b);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_returns_once_sessions_end() {
        let tracker = SessionTracker::new();
        let guard = tracker.track();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(tracker.drain(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn drain_times_out_with_live_session() {
        let tracker = SessionTracker::new();
        let _guard = tracker.track();
        assert!(!tracker.drain(Duration::from_millis(50)).await);
    }
}
