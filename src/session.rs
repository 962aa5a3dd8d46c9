//! A scan session and the worker thread that reconstructs it.
//!
//! While a job runs, the worker thread owns the whole [`Session`]; the caller
//! keeps a [`Worker`] handle to cancel it, follow its progress, look at the
//! preview slice and finally get the session back.

use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use thiserror::Error;

use crate::monitor::{slice_channel, CancelToken, Event, EventSink, Monitor, SliceViewer};
use crate::projection::{EdgePolicy, Projection};
use crate::reconstruction::{Reconstruction, RunState};
use crate::source::{ProjectionSource, SourceError};
use crate::types::Slice;

/// Projections and the volume reconstructed from them
pub struct Session<S> {
    pub projection: Projection<S>,
    pub reconstruction: Reconstruction,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Job {
    Backproject,
    /// Remove metal found in the current volume
    RemoveMetal { threshold: f32, policy: EdgePolicy },
    /// Backproject, then remove metal
    Full { threshold: f32, policy: EdgePolicy },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("reconstruction thread panicked")]
    Panicked,
}

impl<S: ProjectionSource> Session<S> {

    pub fn new(projection: Projection<S>, reconstruction: Reconstruction) -> Self {
        Self { projection, reconstruction }
    }

    /// Run `job` on the calling thread
    pub fn run<E: EventSink>(&mut self, job: Job, monitor: &mut Monitor<E>) -> Result<RunState, SourceError> {
        let Self { projection, reconstruction } = self;
        match job {
            Job::Backproject =>
                reconstruction.backproject(projection, monitor),
            Job::RemoveMetal { threshold, policy } =>
                reconstruction.remove_metal(projection, threshold, policy, monitor),
            Job::Full { threshold, policy } =>
                reconstruction.reconstruct_with_metal_removal(projection, threshold, policy, monitor),
        }
    }
}

impl<S: ProjectionSource + Send + 'static> Session<S> {

    /// Run `job` on a new thread, which owns the session until joined
    pub fn spawn(mut self, job: Job) -> Worker<S> {
        let cancel = CancelToken::new();
        let (sender, events) = mpsc::channel();
        let (publisher, viewer) = slice_channel();
        let mut monitor = Monitor::new(cancel.clone(), sender).with_display(publisher);
        let handle = thread::spawn(move || {
            let outcome = self.run(job, &mut monitor);
            (self, outcome)
        });
        Worker { cancel, events, viewer, handle }
    }
}

pub struct Worker<S> {
    cancel: CancelToken,
    events: Receiver<Event>,
    viewer: SliceViewer,
    handle: JoinHandle<(Session<S>, Result<RunState, SourceError>)>,
}

impl<S> Worker<S> {

    /// Ask the job to stop as soon as possible
    pub fn cancel(&self) { self.cancel.cancel() }

    /// Progress events, in the order they were published
    pub fn events(&self) -> &Receiver<Event> { &self.events }

    /// The most recent preview of the central slice, if any has been published
    pub fn latest_slice(&mut self) -> Option<&Slice> { self.viewer.latest() }

    /// Wait for the job to end and take back the session
    pub fn join(self) -> Result<(Session<S>, RunState), WorkerError> {
        let (session, outcome) = self.handle.join().map_err(|_| WorkerError::Panicked)?;
        Ok((session, outcome?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam_hardening::BeamHardening;
    use crate::geometry::{test_utils::toy_geometry, Geometry};
    use crate::source::{MemorySource, RawFrame};
    use ndarray::Array2;
    use std::sync::mpsc::Sender;

    fn frames(n: usize, rows: usize, cols: usize) -> Vec<RawFrame> {
        let mut frames = vec![RawFrame::blank(Array2::from_elem((rows, cols), 1000))];
        for k in 0..n {
            frames.push(RawFrame::projection(k as f64, Array2::from_elem((rows, cols), 700)));
        }
        frames
    }

    fn session<S: ProjectionSource>(source: S) -> Session<S> {
        let projection = Projection::new(source, &BeamHardening::default()).unwrap();
        Session::new(projection, Reconstruction::new([4, 4, 4], 0.5))
    }

    fn memory_source(n: usize) -> MemorySource {
        let mut g = toy_geometry(10, 8);
        g.n_projections = n;
        MemorySource::new(g, frames(n, 10, 8))
    }

    /// Hands out a projection only when the test says so
    struct GatedSource {
        inner: MemorySource,
        gate: Receiver<()>,
    }

    impl ProjectionSource for GatedSource {
        fn geometry(&self) -> &Geometry { self.inner.geometry() }
        fn rewind(&mut self) -> Result<(), SourceError> { self.inner.rewind() }
        fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
            match self.inner.next_frame()? {
                Some(frame) if !frame.is_blank() => Ok(self.gate.recv().ok().map(|_| frame)),
                other => Ok(other),
            }
        }
    }

    fn gated(n: usize) -> (GatedSource, Sender<()>) {
        let (open, gate) = mpsc::channel();
        (GatedSource { inner: memory_source(n), gate }, open)
    }

    #[test]
    fn worker_hands_the_session_back() -> Result<(), WorkerError> {
        let mut worker = session(memory_source(5)).spawn(Job::Backproject);
        let events: Vec<_> = worker.events().iter().collect();
        assert_eq!(events.len(), 5);
        assert_eq!(events.last(), Some(&Event::Completed));
        assert!(worker.latest_slice().is_some());
        let (session, state) = worker.join()?;
        assert_eq!(state, RunState::Completed);
        assert_eq!(session.reconstruction.state(), RunState::Completed);
        assert!(session.reconstruction.volume().max() > 0.0);
        Ok(())
    }

    #[test]
    fn cancelled_worker_stops_reporting_progress() -> Result<(), WorkerError> {
        let (source, open) = gated(20);
        let worker = session(source).spawn(Job::Full { threshold: 0.0, policy: EdgePolicy::Clamp });
        // Priming projection plus two more
        for _ in 0..3 { open.send(()).unwrap(); }
        let events = worker.events();
        assert_eq!(events.recv().unwrap(), Event::Progress { done: 1, total: 20 });
        assert_eq!(events.recv().unwrap(), Event::Progress { done: 2, total: 20 });
        worker.cancel();
        open.send(()).unwrap();
        assert_eq!(events.recv().unwrap(), Event::Cancelled);
        drop(open);
        let rest: Vec<_> = worker.events().iter().collect();
        assert!(rest.is_empty(), "events after cancellation: {rest:?}");
        let (session, state) = worker.join()?;
        assert_eq!(state, RunState::Cancelled);
        assert_eq!(session.reconstruction.state(), RunState::Cancelled);
        Ok(())
    }

    #[test]
    fn run_on_calling_thread() -> Result<(), SourceError> {
        let mut s = session(memory_source(3));
        let mut monitor = Monitor::new(CancelToken::new(), Vec::<Event>::new());
        let state = s.run(Job::Full { threshold: f32::MAX, policy: EdgePolicy::Skip }, &mut monitor)?;
        assert_eq!(state, RunState::Completed);
        assert_eq!(monitor.events.iter().filter(|e| **e == Event::Completed).count(), 2);
        Ok(())
    }

    #[test]
    fn source_errors_surface_on_join() {
        let mut fs = frames(3, 10, 8);
        fs.push(RawFrame::projection(9.0, Array2::from_elem((2, 2), 1)));
        let source = MemorySource::new(toy_geometry(10, 8), fs);
        let result = session(source).spawn(Job::Backproject).join();
        assert!(matches!(result, Err(WorkerError::Source(SourceError::Shape { .. }))));
    }
}
