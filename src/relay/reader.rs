//! Cancellable reader
//!
//! Wraps an [`AsyncRead`] so every read first checks a cancellation token.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Error carried inside the `Interrupted` I/O error returned after cancellation
#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Build the error a [`ContextReader`] returns once cancelled
pub fn cancelled_error() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, Cancelled)
}

/// Check whether an I/O error came from a cancelled [`ContextReader`]
pub fn is_cancelled(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
        && err.get_ref().map_or(false, |inner| inner.is::<Cancelled>())
}

/// Reader that fails with a cancellation error once its token fires
///
/// The token is checked before the inner reader is polled, so a cancelled
/// reader never touches the underlying source. There is no buffering.
#[derive(Debug)]
pub struct ContextReader<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R> ContextReader<R> {
    /// Wrap a reader
    pub fn new(inner: R, cancel: CancellationToken) -> Self {
        ContextReader { inner, cancel }
    }

    /// Unwrap the inner reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ContextReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.cancel.is_cancelled() {
            return Poll::Ready(Err(cancelled_error()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
