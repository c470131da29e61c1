//! Body capture limits.
//!
//! # Responsibilities
//! - Cap how many body bytes are retained for observation per direction
//! - Track total bytes seen so truncation can be reported
//!
//! # Design Decisions
//! - Capture only copies; the bytes handed to the transport are never altered
//! - Truncation is reported iff more bytes were seen than retained

use bytes::{Bytes, BytesMut};

/// Default number of body bytes retained per direction.
pub const DEFAULT_CAPTURE_LIMIT: usize = 2048;

/// Return the first `limit` bytes of `body` and whether anything was cut off.
pub fn truncate(body: &[u8], limit: usize) -> (&[u8], bool) {
    if body.len() > limit {
        (&body[..limit], true)
    } else {
        (body, false)
    }
}

/// Incremental capture of a streamed body.
#[derive(Debug)]
pub struct BodyCapture {
    limit: usize,
    retained: BytesMut,
    total: u64,
}

impl BodyCapture {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            retained: BytesMut::with_capacity(limit.min(8 * 1024)),
            total: 0,
        }
    }

    /// Observe one chunk of the body as it passes through.
    pub fn observe(&mut self, chunk: &[u8]) {
        self.total += chunk.len() as u64;
        let room = self.limit - self.retained.len();
        if room > 0 {
            let (prefix, _) = truncate(chunk, room);
            self.retained.extend_from_slice(prefix);
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_truncated(&self) -> bool {
        self.total > self.limit as u64
    }

    /// Take the retained prefix, leaving the capture empty.
    pub fn take(&mut self) -> Bytes {
        std::mem::take(&mut self.retained).freeze()
    }
}
