//! Moving-average smoothing for frame streams

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, ready};
use pin_project_lite::pin_project;

use crate::types::{DataFrame, SmoothingWindow};

/// Extension trait to add smoothing to any stream of frames
pub trait SmoothedExt: Stream<Item = Arc<DataFrame>> {
    /// Replace each frame with the average of it and the `window - 1` frames before it.
    ///
    /// The first frames are averaged over however many have arrived so far.
    fn smoothed(self, window: usize) -> Smoothed<Self>
    where
        Self: Sized,
    {
        Smoothed::new(self, window)
    }
}

impl<T: Stream<Item = Arc<DataFrame>>> SmoothedExt for T {}

pin_project! {
    /// A stream combinator that averages a sliding window of frames
    pub struct Smoothed<S> {
        #[pin]
        stream: S,
        window: SmoothingWindow,
    }
}

impl<S> Smoothed<S> {
    pub fn new(stream: S, window: usize) -> Self {
        Self { stream, window: SmoothingWindow::new(window) }
    }

    /// Frames currently in the window.
    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

impl<S: Stream<Item = Arc<DataFrame>>> Stream for Smoothed<S> {
    type Item = DataFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.stream.poll_next(cx)) {
            Some(frame) => {
                this.window.push(frame);
                Poll::Ready(this.window.average())
            }
            None => Poll::Ready(None),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.stream.size_hint()
    }
}
