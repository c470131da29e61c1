//! Streaming body wrapper that retains a capped prefix for observation.
//!
//! Frames pass through untouched. When the stream ends, errors or is dropped,
//! whatever was seen is reported once through a oneshot channel.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use tokio::sync::oneshot;

use crate::observability::CapturedBody;
use crate::security::BodyCapture;

/// Final report for one body direction.
#[derive(Debug)]
pub struct Captured {
    /// Retained prefix, or `None` when body capture is disabled.
    pub body: Option<CapturedBody>,
    pub total_bytes: u64,
    pub complete: bool,
    pub error: Option<String>,
    pub finished_at: Instant,
}

/// Wraps a body and tees at most `limit` bytes into a capture buffer.
pub struct CaptureBody<B> {
    inner: B,
    empty: bool,
    capture: BodyCapture,
    retain: bool,
    report: Option<oneshot::Sender<Captured>>,
}

impl<B> CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    /// `limit` of `None` counts bytes without retaining any.
    pub fn new(inner: B, limit: Option<usize>) -> (Self, oneshot::Receiver<Captured>) {
        let (tx, rx) = oneshot::channel();
        let body = Self {
            empty: inner.is_end_stream(),
            inner,
            capture: BodyCapture::new(limit.unwrap_or(0)),
            retain: limit.is_some(),
            report: Some(tx),
        };
        (body, rx)
    }
}

impl<B> CaptureBody<B> {
    fn finish(&mut self, complete: bool, error: Option<String>) {
        let Some(tx) = self.report.take() else {
            return;
        };
        let body = self.retain.then(|| CapturedBody {
            truncated: self.capture.is_truncated(),
            total_bytes: self.capture.total(),
            data: self.capture.take(),
            complete,
        });
        let _ = tx.send(Captured {
            body,
            total_bytes: self.capture.total(),
            complete,
            error,
            finished_at: Instant::now(),
        });
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.capture.observe(data);
                }
                if this.inner.is_end_stream() {
                    this.finish(true, None);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish(false, Some(e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(true, None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        // A body that was empty from the start may never be polled.
        let complete = self.empty;
        self.finish(complete, None);
    }
}
