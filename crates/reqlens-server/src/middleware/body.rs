//! Response body decorator: counts bytes and finalizes the request timer
//! when the last frame has been produced.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;

use super::timer::RequestTimer;

#[pin_project]
pub struct InstrumentedBody<B> {
    #[pin]
    inner: B,
    timer: Option<RequestTimer>,
}

impl<B> InstrumentedBody<B> {
    pub fn new(inner: B, timer: RequestTimer) -> Self {
        Self {
            inner,
            timer: Some(timer),
        }
    }
}

impl<B: Body> Body for InstrumentedBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = ready!(this.inner.poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let (Some(data), Some(timer)) = (frame.data_ref(), this.timer.as_mut()) {
                    timer.add_bytes(data.remaining() as u64);
                }
            }
            // end of stream or a broken body: either way nothing more is written
            Some(Err(_)) | None => {
                this.timer.take();
            }
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
