//! Body streaming and capture utilities.
//!
//! This module taps HTTP request and response bodies, keeping a bounded copy for the
//! audit line while every frame continues, unchanged, to its real consumer. Both
//! wrappers forward `size_hint` and `is_end_stream`, so fixed-length bodies keep their
//! `Content-Length` framing.

use axum::body::{Body, Bytes, HttpBody};
use bytes::BytesMut;
use futures::{ready, Future};
use http_body::{Frame, SizeHint};
use http_body_util::BodyExt;
use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tracing::error;

type FrameResult = Result<Frame<Bytes>, axum::Error>;

/// Resolves to the bytes copied from a tapped body.
pub type CapturedBody = Pin<Box<dyn Future<Output = Bytes> + Send>>;

/// Forwards frames from `inner` and sends a bounded copy of their data to the capture.
struct TapBody<B> {
    inner: B,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    remaining: usize,
}

impl<B> TapBody<B> {
    fn copy(&mut self, chunk: &Bytes) {
        if self.remaining == 0 || chunk.is_empty() {
            return;
        }
        let take = self.remaining.min(chunk.len());
        self.remaining -= take;
        if let Some(tx) = &self.tx {
            let _ = tx.send(chunk.slice(..take));
        }
        if self.remaining == 0 {
            // Limit reached: let the capture resolve without waiting for the rest
            self.tx = None;
        }
    }
}

impl<B> HttpBody for TapBody<B>
where
    B: HttpBody<Data = Bytes, Error = axum::Error> + Unpin,
{
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        let polled = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let Some(chunk) = frame.data_ref() {
                    this.copy(chunk);
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "Stream error during body capture");
                this.tx = None;
            }
            None => this.tx = None,
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Creates a body that passes every frame through while copying at most `limit` bytes
/// into a side buffer.
///
/// The returned future resolves once the new body has been fully read, dropped, or has
/// failed, with whatever prefix was copied up to that point. Data past the limit is
/// forwarded but not copied, so memory held for logging stays bounded no matter how
/// large the body is.
///
/// # Examples
///
/// ```rust
/// use bucketlog::body_wrapper::create_body_capture_stream;
/// use axum::body::Body;
/// use http_body_util::BodyExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let original_body = Body::from("Hello, World!");
/// let (new_body, capture_future) = create_body_capture_stream(original_body, 5);
///
/// // The consumer still sees the full body
/// let seen = new_body.collect().await?.to_bytes();
/// assert_eq!(seen, "Hello, World!");
///
/// // The capture holds the first five bytes
/// assert_eq!(capture_future.await, "Hello");
/// # Ok(())
/// # }
/// ```
pub fn create_body_capture_stream<B>(body: B, limit: usize) -> (Body, CapturedBody)
where
    B: HttpBody<Data = Bytes, Error = axum::Error> + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tx = (limit > 0).then_some(tx);

    let new_body = Body::new(TapBody {
        inner: body,
        tx,
        remaining: limit,
    });

    // Resolves when the sender is gone: body finished, failed, dropped or limit reached
    let capture_future = Box::pin(async move {
        let mut captured = BytesMut::new();
        while let Some(chunk) = rx.recv().await {
            captured.extend_from_slice(&chunk);
        }
        captured.freeze()
    });

    (new_body, capture_future)
}

/// Replays buffered frames, then continues with the unread remainder of the body.
struct ReplayBody {
    replay: VecDeque<FrameResult>,
    rest: Option<Body>,
}

impl HttpBody for ReplayBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if let Some(frame) = self.replay.pop_front() {
            return Poll::Ready(Some(frame));
        }
        match self.rest.as_mut() {
            Some(rest) => Pin::new(rest).poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.replay.is_empty() && self.rest.as_ref().map_or(true, |rest| rest.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let buffered: u64 = self
            .replay
            .iter()
            .filter_map(|frame| frame.as_ref().ok()?.data_ref())
            .map(|chunk| chunk.len() as u64)
            .sum();
        let rest = self
            .rest
            .as_ref()
            .map_or_else(|| SizeHint::with_exact(0), |rest| rest.size_hint());

        let mut hint = SizeHint::new();
        hint.set_lower(rest.lower() + buffered);
        if let Some(upper) = rest.upper() {
            hint.set_upper(upper + buffered);
        }
        hint
    }
}

/// Reads up to `limit` bytes from the front of `body`, then rebuilds a body that
/// yields everything from the start.
///
/// Used for request bodies, which are captured before the inner service runs. A read
/// error leaves the capture empty and is replayed to the downstream consumer at the
/// point it occurred.
pub async fn capture_body_prefix(body: Body, limit: usize) -> (Body, Bytes) {
    if limit == 0 {
        return (body, Bytes::new());
    }

    let mut rest = body;
    let mut replay = VecDeque::new();
    let mut captured = BytesMut::new();
    let mut done = false;
    let mut failed = false;

    while captured.len() < limit {
        match rest.frame().await {
            Some(Ok(frame)) => {
                if let Some(chunk) = frame.data_ref() {
                    let take = (limit - captured.len()).min(chunk.len());
                    captured.extend_from_slice(&chunk[..take]);
                }
                replay.push_back(Ok(frame));
            }
            Some(Err(e)) => {
                error!(error = %e, "Error reading request body for capture");
                replay.push_back(Err(e));
                failed = true;
                done = true;
                break;
            }
            None => {
                done = true;
                break;
            }
        }
    }

    let restored = Body::new(ReplayBody {
        replay,
        rest: (!done).then_some(rest),
    });
    let captured = if failed { Bytes::new() } else { captured.freeze() };

    (restored, captured)
}
