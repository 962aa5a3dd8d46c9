//! FDK cone-beam backprojection.

use std::path::Path;
use std::time::Instant;

use ndarray::Axis;
use tracing::info;

#[cfg(not(feature = "serial"))]
use ndarray::parallel::prelude::*;

use crate::geometry::View;
use crate::monitor::{CancelToken, Event, EventSink, Monitor};
use crate::projection::Projection;
use crate::source::{ProjectionSource, SourceError};
use crate::types::{Frame, Lengthf64, VolumeDim_u};
use crate::utils::group_digits;
use crate::volume::{Volume, VolumeError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// A reconstruction volume together with the state of the last pass that
/// wrote into it.
#[derive(Clone, Debug)]
pub struct Reconstruction {
    volume: Volume,
    state: RunState,
}

impl Reconstruction {

    pub fn new(dims: VolumeDim_u, resolution: Lengthf64) -> Self {
        Self::from_volume(Volume::zeros(dims, resolution))
    }

    pub fn from_volume(volume: Volume) -> Self {
        Self { volume, state: RunState::Idle }
    }

    /// Resume from a volume saved by an earlier run, e.g. to remove metal
    pub fn from_raw_file(dims: VolumeDim_u, resolution: Lengthf64, path: &Path) -> Result<Self, VolumeError> {
        Ok(Self::from_volume(Volume::from_raw_file(dims, resolution, path)?))
    }

    pub fn write_raw(&self, path: &Path) -> std::io::Result<()> { self.volume.write_raw(path) }

    pub fn volume     (&self) -> &Volume   { &self.volume }
    pub fn into_volume(self)  ->  Volume   {  self.volume }
    pub fn state      (&self) ->  RunState {  self.state }

    /// Filter and backproject every projection in `projection` into a zeroed
    /// volume.
    ///
    /// The first projection is used to prime the source and is not
    /// backprojected. After each projection the central slice is offered to
    /// the monitor's display and a progress event is published. The pass
    /// stops early if the monitor's token is cancelled, leaving a partial
    /// volume behind.
    pub fn backproject<S, E>(&mut self, projection: &mut Projection<S>, monitor: &mut Monitor<E>) -> Result<RunState, SourceError>
    where
        S: ProjectionSource,
        E: EventSink,
    {
        self.run(projection, monitor, "Backprojection", |p| { p.filter(); Ok(()) })
    }

    /// The pass shared by plain backprojection and metal removal: `prepare`
    /// turns each freshly loaded projection into the filtered frame to
    /// backproject.
    pub(crate) fn run<S, E, F>(
        &mut self,
        projection: &mut Projection<S>,
        monitor: &mut Monitor<E>,
        label: &str,
        mut prepare: F,
    ) -> Result<RunState, SourceError>
    where
        S: ProjectionSource,
        E: EventSink,
        F: FnMut(&mut Projection<S>) -> Result<(), SourceError>,
    {
        let start = Instant::now();
        self.state = RunState::Running;
        self.volume.clear();
        projection.rewind()?;
        let total = projection.total();
        info!("{label}: {total} projections into {:?} voxels", self.volume.dims());

        projection.load_next()?;
        let mut done = 0;
        while projection.load_next()? {
            if monitor.is_cancelled() { return Ok(self.cancelled(monitor)) }
            prepare(projection)?;
            let view = projection.geometry().view(projection.angle());
            if !accumulate(&mut self.volume, projection.data(), &view, &monitor.cancel) {
                return Ok(self.cancelled(monitor))
            }
            done += 1;
            monitor.show(|| self.volume.central_slice());
            monitor.publish(Event::Progress { done, total });
        }

        self.state = RunState::Completed;
        monitor.publish(Event::Completed);
        info!("{label} of {done} projections took {} ms", group_digits(start.elapsed().as_millis()));
        Ok(self.state)
    }

    fn cancelled<E: EventSink>(&mut self, monitor: &mut Monitor<E>) -> RunState {
        info!("Reconstruction cancelled");
        self.state = RunState::Cancelled;
        monitor.publish(Event::Cancelled);
        self.state
    }
}

/// Add the weighted, bilinearly sampled `frame` to every voxel whose ray hits
/// the detector interior. Returns `false` if cancelled part-way.
///
/// Each `(row, col)` voxel column is owned by exactly one task, so the result
/// does not depend on how the work is scheduled.
fn accumulate(volume: &mut Volume, frame: &Frame, view: &View, cancel: &CancelToken) -> bool {
    let coordinates = volume.coordinates();
    let (xs, ys, zs) = (&coordinates.x, &coordinates.y, &coordinates.z);

    // Planes of constant row: [slice, col]
    #[cfg    (feature = "serial") ] let planes = volume.data_mut().axis_iter_mut(Axis(1)).enumerate();
    #[cfg(not(feature = "serial"))] let planes = volume.data_mut().axis_iter_mut(Axis(1)).into_par_iter().enumerate();

    planes.for_each(|(j, mut plane)| {
        for (k, &x) in xs.iter().enumerate() {
            let ray = view.ray(x, ys[j]);
            for (i, &z) in zs.iter().enumerate() {
                if let Some(cell) = view.cell(ray.row, ray.column(z)) {
                    let voxel = &mut plane[[i, k]];
                    *voxel = (*voxel as f64 + ray.weight * cell.sample(frame)) as f32;
                }
            }
            if cancel.is_cancelled() { return }
        }
    });
    !cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beam_hardening::BeamHardening;
    use crate::geometry::test_utils::toy_geometry;
    use crate::monitor::slice_channel;
    use crate::source::{MemorySource, RawFrame};
    use ndarray::Array2;

    /// Uniform attenuation `ln 2` on every projection
    fn uniform_session(n_projections: usize) -> Projection<MemorySource> {
        let (rows, cols) = (12, 10);
        let mut frames = vec![RawFrame::blank(Array2::from_elem((rows, cols), 1000))];
        for n in 0..n_projections {
            frames.push(RawFrame::projection(n as f64 * 30.0, Array2::from_elem((rows, cols), 500)));
        }
        let mut g = toy_geometry(rows, cols);
        g.n_projections = n_projections;
        Projection::new(MemorySource::new(g, frames), &BeamHardening::none()).unwrap()
    }

    #[test]
    fn first_projection_primes_and_the_rest_report_progress() -> Result<(), SourceError> {
        let mut projection = uniform_session(4);
        let mut recon = Reconstruction::new([3, 4, 4], 1.0);
        assert_eq!(recon.state(), RunState::Idle);
        let mut monitor = Monitor::new(CancelToken::new(), Vec::<Event>::new());
        let state = recon.backproject(&mut projection, &mut monitor)?;
        assert_eq!(state, RunState::Completed);
        assert_eq!(monitor.events, vec![
            Event::Progress { done: 1, total: 4 },
            Event::Progress { done: 2, total: 4 },
            Event::Progress { done: 3, total: 4 },
            Event::Completed,
        ]);
        Ok(())
    }

    #[test]
    fn uniform_projections_give_positive_voxels() -> Result<(), SourceError> {
        let mut projection = uniform_session(3);
        let mut recon = Reconstruction::new([3, 4, 4], 1.0);
        recon.backproject(&mut projection, &mut Monitor::silent())?;
        // Unity kernel, so each frame contributes weight × cosine × ln 2 > 0
        assert!(recon.volume().data().iter().all(|&v| v > 0.0));
        Ok(())
    }

    #[test]
    fn passes_start_from_zero() -> Result<(), SourceError> {
        let mut projection = uniform_session(3);
        let mut recon = Reconstruction::new([3, 4, 4], 1.0);
        recon.backproject(&mut projection, &mut Monitor::silent())?;
        let first = recon.volume().clone();
        recon.backproject(&mut projection, &mut Monitor::silent())?;
        assert_eq!(recon.volume(), &first);
        Ok(())
    }

    #[test]
    fn cancelled_before_start() -> Result<(), SourceError> {
        let mut projection = uniform_session(3);
        let mut recon = Reconstruction::new([3, 4, 4], 1.0);
        let mut monitor = Monitor::new(CancelToken::new(), Vec::<Event>::new());
        monitor.cancel.cancel();
        assert_eq!(recon.backproject(&mut projection, &mut monitor)?, RunState::Cancelled);
        assert_eq!(recon.state(), RunState::Cancelled);
        assert_eq!(monitor.events, vec![Event::Cancelled]);
        Ok(())
    }

    #[test]
    fn cancellation_inside_a_projection_leaves_it_partly_accumulated() -> Result<(), SourceError> {
        // Projections at 30° and 60°: the reference has only the first
        let mut first_only = Reconstruction::new([3, 4, 4], 1.0);
        first_only.backproject(&mut uniform_session(2), &mut Monitor::silent())?;

        let mut projection = uniform_session(3);
        let mut recon = Reconstruction::new([3, 4, 4], 1.0);
        let mut monitor = Monitor::new(CancelToken::new(), Vec::<Event>::new());
        let token = monitor.cancel.clone();
        let mut prepared = 0;
        // Cancelled after the check at the start of the second projection, so
        // only the voxel loop can notice
        let state = recon.run(&mut projection, &mut monitor, "Backprojection", |p| {
            prepared += 1;
            if prepared == 2 { token.cancel() }
            p.filter();
            Ok(())
        })?;
        assert_eq!(state, RunState::Cancelled);
        assert_eq!(monitor.events, vec![Event::Progress { done: 1, total: 3 }, Event::Cancelled]);

        // Each row plane stops after its first voxel column
        let (partial, reference) = (recon.volume().data(), first_only.volume().data());
        for ((i, j, k), &v) in partial.indexed_iter() {
            if k > 0 { assert_eq!(v, reference[[i, j, k]], "voxel {:?}", (i, j, k)) }
        }
        let first_column = |v: &Volume| v.data().index_axis(Axis(2), 0).sum();
        assert!(first_column(recon.volume()) > first_column(first_only.volume()));
        Ok(())
    }

    #[test]
    fn display_receives_central_slice() -> Result<(), SourceError> {
        let mut projection = uniform_session(3);
        let mut recon = Reconstruction::new([5, 4, 4], 1.0);
        let (publisher, mut viewer) = slice_channel();
        let mut monitor = Monitor::silent().with_display(publisher);
        recon.backproject(&mut projection, &mut monitor)?;
        // Only the first snapshot fits in the channel; it lags the final volume
        let shown = viewer.latest().cloned().unwrap();
        assert_eq!(shown.dim(), (4, 4));
        assert!(shown.iter().zip(recon.volume().central_slice().iter()).all(|(s, v)| s <= v));
        Ok(())
    }
}
