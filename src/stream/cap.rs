//! Rate cap with drop-excess semantics

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, interval};

/// Extension trait to add window-capped delivery to any Stream
pub trait RelayStreamExt: Stream {
    /// Pass through at most `cap` items per `window`.
    ///
    /// Items over the budget are dropped, not queued; every window
    /// boundary restores the full budget. Unlike latest-wins
    /// throttling this preserves the first items of a burst, which is
    /// what an event log wants.
    fn cap_per_window(self, cap: usize, window: Duration) -> CapPerWindow<Self>
    where
        Self: Sized,
    {
        CapPerWindow::new(self, cap, window)
    }
}

impl<T: Stream> RelayStreamExt for T {}

pin_project! {
    /// A stream combinator that drops items over a per-window budget
    pub struct CapPerWindow<S: Stream> {
        #[pin]
        stream: S,
        window: Interval,
        budget: usize,
        cap: usize,
    }
}

impl<S: Stream> CapPerWindow<S> {
    pub fn new(stream: S, cap: usize, duration: Duration) -> Self {
        let mut window = interval(duration);
        window.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { stream, window, budget: cap, cap }
    }
}

impl<S: Stream> Stream for CapPerWindow<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Budget does not accumulate across idle windows.
        if this.window.poll_tick(cx).is_ready() {
            *this.budget = *this.cap;
        }

        loop {
            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(item) => {
                    if *this.budget > 0 {
                        *this.budget -= 1;
                        return Poll::Ready(Some(item));
                    }
                    // Over budget: drop and keep draining. Nothing is
                    // queued, so no wakeup is owed for the next tick.
                }
                None => return Poll::Ready(None),
            }
        }
    }
}
