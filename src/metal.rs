//! Metal artifact removal.
//!
//! Voxels of a first reconstruction that exceed a threshold are taken to be
//! metal. Each is projected onto the detector for every angle, the detector
//! pixels it shadows are replaced by interpolation across the shadow, and the
//! patched projections are reconstructed again.

use tracing::info;

use crate::geometry::View;
use crate::monitor::{EventSink, Monitor};
use crate::projection::{EdgePolicy, Projection};
use crate::reconstruction::{Reconstruction, RunState};
use crate::source::{ProjectionSource, SourceError};
use crate::types::{DetectorMask, Lengthf64};
use crate::volume::Volume;

/// Physical positions of the voxels classified as metal
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetalVoxels(Vec<[Lengthf64; 3]>);

impl MetalVoxels {

    /// Every voxel strictly above `threshold`, as `[x, y, z]`
    pub fn above(volume: &Volume, threshold: f32) -> Self {
        let c = volume.coordinates();
        Self(volume
             .voxels_above(threshold)
             .into_iter()
             .map(|[i, j, k]| [c.x[k], c.y[j], c.z[i]])
             .collect())
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Detector pixels used by the bilinear samples of any metal voxel, as
    /// seen from `view`.
    pub fn detector_mask(&self, view: &View, rows: usize, cols: usize) -> DetectorMask {
        let mut mask = DetectorMask::from_elem((rows, cols), false);
        for &[x, y, z] in &self.0 {
            let ray = view.ray(x, y);
            if let Some(cell) = view.cell(ray.row, ray.column(z)) {
                for pixel in cell.neighbourhood() {
                    mask[pixel] = true;
                }
            }
        }
        mask
    }
}

impl Reconstruction {

    /// Reconstruct again after erasing the detector shadows of every voxel
    /// above `threshold` in the current volume.
    ///
    /// The current volume is only used to find the metal: the new pass starts
    /// from zero, with the same progress and cancellation behaviour as
    /// [`Reconstruction::backproject`]. If nothing exceeds the threshold the
    /// result is identical to a plain backprojection.
    pub fn remove_metal<S, E>(
        &mut self,
        projection: &mut Projection<S>,
        threshold: f32,
        policy: EdgePolicy,
        monitor: &mut Monitor<E>,
    ) -> Result<RunState, SourceError>
    where
        S: ProjectionSource,
        E: EventSink,
    {
        let metal = MetalVoxels::above(self.volume(), threshold);
        info!("{} voxels above metal threshold {threshold}", metal.len());
        self.run(projection, monitor, "Metal artifact removal", |p| {
            let (rows, cols) = (p.geometry().rows, p.geometry().cols);
            let view = p.geometry().view(p.angle());
            let mask = metal.detector_mask(&view, rows, cols);
            p.interpolate(&mask, policy);
            p.filter();
            Ok(())
        })
    }

    /// Plain backprojection followed, unless cancelled, by metal removal
    pub fn reconstruct_with_metal_removal<S, E>(
        &mut self,
        projection: &mut Projection<S>,
        threshold: f32,
        policy: EdgePolicy,
        monitor: &mut Monitor<E>,
    ) -> Result<RunState, SourceError>
    where
        S: ProjectionSource,
        E: EventSink,
    {
        match self.backproject(projection, monitor)? {
            RunState::Completed => self.remove_metal(projection, threshold, policy, monitor),
            other               => Ok(other),
        }
    }
}
