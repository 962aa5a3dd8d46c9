//! Observing and steering a running reconstruction from another thread:
//! cancellation, progress events and the preview slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;

use crate::types::Slice;

/// Shared flag asking a running pass to stop at the next voxel column
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed) }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// `done` of `total` projections have been backprojected
    Progress { done: usize, total: usize },
    Completed,
    Cancelled,
}

pub trait EventSink {
    fn publish(&mut self, event: Event);
}

/// A disconnected receiver just means nobody is watching
impl EventSink for Sender<Event> {
    fn publish(&mut self, event: Event) { let _ = self.send(event); }
}

impl EventSink for Vec<Event> {
    fn publish(&mut self, event: Event) { self.push(event) }
}

impl EventSink for () {
    fn publish(&mut self, _: Event) {}
}

impl<E: EventSink + ?Sized> EventSink for &mut E {
    fn publish(&mut self, event: Event) { (**self).publish(event) }
}

// ----- Preview slice ---------------------------------------------------------------------

/// Bounded hand-off of preview slices: at most one snapshot in flight.
pub fn slice_channel() -> (SlicePublisher, SliceViewer) {
    let (tx, rx) = mpsc::sync_channel(1);
    (SlicePublisher(tx), SliceViewer { rx, latest: None })
}

#[derive(Clone, Debug)]
pub struct SlicePublisher(SyncSender<Slice>);

impl SlicePublisher {
    /// Offer a snapshot without blocking. Returns `false` if it was dropped
    /// because the previous one has not been picked up yet.
    pub fn publish(&self, slice: Slice) -> bool {
        match self.0.try_send(slice) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }
}

#[derive(Debug)]
pub struct SliceViewer {
    rx: Receiver<Slice>,
    latest: Option<Slice>,
}

impl SliceViewer {
    /// Most recent snapshot received so far
    pub fn latest(&mut self) -> Option<&Slice> {
        if let Some(newest) = self.rx.try_iter().last() {
            self.latest = Some(newest);
        }
        self.latest.as_ref()
    }

    pub fn into_latest(mut self) -> Option<Slice> {
        self.latest();
        self.latest
    }
}

// ----- Monitor ---------------------------------------------------------------------------

/// Everything a reconstruction pass reports to, or is steered by
#[derive(Debug)]
pub struct Monitor<E> {
    pub cancel: CancelToken,
    pub events: E,
    pub display: Option<SlicePublisher>,
}

impl<E: EventSink> Monitor<E> {
    pub fn new(cancel: CancelToken, events: E) -> Self {
        Self { cancel, events, display: None }
    }

    pub fn with_display(mut self, display: SlicePublisher) -> Self {
        self.display = Some(display);
        self
    }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    pub fn publish(&mut self, event: Event) { self.events.publish(event) }

    pub fn show(&self, slice: impl FnOnce() -> Slice) {
        if let Some(display) = &self.display { display.publish(slice()); }
    }
}

impl Monitor<()> {
    /// Never cancelled, reports to nobody
    pub fn silent() -> Self { Self::new(CancelToken::new(), ()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn viewer_sees_the_latest_accepted_slice() {
        let (publisher, mut viewer) = slice_channel();
        assert!(viewer.latest().is_none());
        assert!( publisher.publish(Array2::from_elem((1, 1), 1.0)));
        // Channel full: this one is dropped rather than blocking the worker
        assert!(!publisher.publish(Array2::from_elem((1, 1), 2.0)));
        assert_eq!(viewer.latest().map(|s| s[[0, 0]]), Some(1.0));
        assert!( publisher.publish(Array2::from_elem((1, 1), 3.0)));
        assert_eq!(viewer.latest().map(|s| s[[0, 0]]), Some(3.0));
        // Nothing new: keep showing the last one
        assert_eq!(viewer.latest().map(|s| s[[0, 0]]), Some(3.0));
    }

    #[test]
    fn publishing_without_a_viewer_is_harmless() {
        let (publisher, viewer) = slice_channel();
        drop(viewer);
        assert!(!publisher.publish(Array2::zeros((2, 2))));
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut tx: Sender<Event> = tx;
        tx.publish(Event::Completed);
    }
}
