//! The live projection frame: normalization, filtering and gap filling.
//!
//! A [`Projection`] wraps a [`ProjectionSource`] and keeps exactly one frame
//! of line integrals in memory. Each call to [`Projection::load_next`]
//! overwrites it with the next projection; [`Projection::filter`] then
//! transforms it in place, ready for backprojection.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis, Zip};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::Deserialize;
use tracing::{debug, warn};

#[cfg(not(feature = "serial"))]
use ndarray::parallel::prelude::*;

use crate::beam_hardening::{BeamHardening, Polynomial};
use crate::filter::{Cutoff, FilterKernel, FilterKind};
use crate::geometry::Geometry;
use crate::io;
use crate::source::{ProjectionSource, SourceError};
use crate::types::{Anglef64, DetectorMask, Frame};

/// What to do with a masked run that touches the edge of the detector, where
/// there is only one neighbour to interpolate from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgePolicy {
    /// Fill the run with the value of its only neighbour
    #[default]
    Clamp,
    /// Leave the run untouched
    Skip,
}

impl FromStr for EdgePolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(EdgePolicy::Clamp),
            "skip"  => Ok(EdgePolicy::Skip),
            other   => Err(format!("unknown edge policy '{other}' (expected clamp or skip)")),
        }
    }
}

pub struct Projection<S> {
    source: S,
    geometry: Geometry,
    blank: Array2<f64>,
    weights: Frame,
    kernel: FilterKernel,
    convolver: Convolver,
    correction: Polynomial,
    data: Frame,
    angle: Anglef64,
}

impl<S: ProjectionSource> Projection<S> {

    /// Prepare a session on `source`: find the blank scan, build the cosine
    /// weights and select the beam-hardening polynomial for the scan voltage.
    ///
    /// If the source contains no blank scan, a zero reference is used. The
    /// reconstruction will be meaningless, but it will run.
    pub fn new(mut source: S, beam_hardening: &BeamHardening) -> Result<Self, SourceError> {
        let geometry = source.geometry().clone();
        let (rows, cols) = (geometry.rows, geometry.cols);

        source.rewind()?;
        let mut blank = None;
        while let Some(frame) = source.next_frame()? {
            if frame.is_blank() {
                check_shape(&frame.pixels, rows, cols)?;
                blank = Some(frame.pixels.mapv(f64::from));
                break;
            }
        }
        source.rewind()?;
        let blank = blank.unwrap_or_else(|| {
            warn!("No blank scan found: using a zero reference");
            Array2::zeros((rows, cols))
        });

        Ok(Self {
            weights: geometry.cosine_weight_map(),
            kernel: FilterKernel::unity(rows),
            convolver: Convolver::new(rows),
            correction: beam_hardening.polynomial(geometry.kvp),
            data: Array2::zeros((rows, cols)),
            angle: 0.0,
            blank,
            geometry,
            source,
        })
    }

    /// Replace the current frame with the next projection from the source,
    /// converted to beam-hardening corrected line integrals. Blank scans are
    /// skipped. Returns `false` once the source is exhausted.
    pub fn load_next(&mut self) -> Result<bool, SourceError> {
        let frame = loop {
            match self.source.next_frame()? {
                None                            => return Ok(false),
                Some(frame) if frame.is_blank() => continue,
                Some(frame)                     => break frame,
            }
        };
        check_shape(&frame.pixels, self.geometry.rows, self.geometry.cols)?;
        let correction = self.correction;
        Zip::from(&mut self.data)
            .and(&frame.pixels)
            .and(&self.blank)
            .for_each(|p, &raw, &blank| {
                let line_integral = (blank / raw as f64).ln();
                *p = correction.apply(line_integral) as f32;
            });
        self.angle = frame.angle;
        debug!("Loaded projection at {:.3}°", self.angle);
        Ok(true)
    }

    pub fn rewind(&mut self) -> Result<(), SourceError> { self.source.rewind() }

    /// Number of projections in one pass over the source
    pub fn total(&self) -> usize { self.source.total() }

    pub fn source(&self) -> &S { &self.source }
    pub fn into_source(self) -> S { self.source }
}

impl<S> Projection<S> {

    /// Rebuild the shared filter kernel
    pub fn set_filter(&mut self, kind: &FilterKind, cutoff: Cutoff) {
        self.kernel = FilterKernel::new(kind, cutoff, self.geometry.rows);
    }

    pub fn kernel(&self) -> &FilterKernel { &self.kernel }

    /// Apply cosine weighting, then convolve every detector column with the
    /// filter kernel. Destructive: call once per loaded frame.
    pub fn filter(&mut self) {
        self.data *= &self.weights;
        let (kernel, convolver) = (&self.kernel, &self.convolver);
        #[cfg    (feature = "serial") ] let columns = self.data.axis_iter_mut(Axis(1));
        #[cfg(not(feature = "serial"))] let columns = self.data.axis_iter_mut(Axis(1)).into_par_iter();
        columns.for_each(|column| convolver.convolve(column, kernel));
    }

    /// Fill masked pixels by linear interpolation along each detector column
    pub fn interpolate(&mut self, mask: &DetectorMask, policy: EdgePolicy) {
        for (column, mask) in self.data.axis_iter_mut(Axis(1)).zip(mask.axis_iter(Axis(1))) {
            interpolate_column(column, mask, policy);
        }
    }

    /// `self -= ratio × other`, pixel by pixel
    pub fn subtract(&mut self, other: &Frame, ratio: f32) {
        self.data.scaled_add(-ratio, other);
    }

    pub fn angle   (&self) -> Anglef64  { self.angle }
    pub fn data    (&self) -> &Frame    { &self.data }
    pub fn data_mut(&mut self) -> &mut Frame { &mut self.data }
    pub fn geometry(&self) -> &Geometry { &self.geometry }

    /// Dump the current frame as raw little-endian `f32`, row by row
    pub fn write_raw(&self, path: &Path) -> std::io::Result<()> {
        io::raw::write(self.data.iter().copied(), path)
    }
}

fn check_shape(pixels: &Array2<u16>, rows: usize, cols: usize) -> Result<(), SourceError> {
    if pixels.dim() == (rows, cols) { Ok(()) }
    else { Err(SourceError::Shape { got: pixels.len(), rows, cols }) }
}

/// Replace each maximal run `[a, b]` of masked samples by the straight line
/// joining `column[a-1]` and `column[b+1]`.
pub fn interpolate_column(mut column: ArrayViewMut1<f32>, mask: ArrayView1<bool>, policy: EdgePolicy) {
    let n = column.len();
    let mut i = 0;
    while i < n {
        if !mask[i] { i += 1; continue }
        let a = i;
        while i < n && mask[i] { i += 1; }
        let b = i - 1;
        let before = a.checked_sub(1).map(|k| column[k] as f64);
        let after  = (i < n).then(|| column[i] as f64);
        match (before, after) {
            (Some(lo), Some(hi)) => {
                let span = (b - a + 2) as f64;
                for m in a..=b {
                    column[m] = (lo + (m - a + 1) as f64 * (hi - lo) / span) as f32;
                }
            }
            (Some(v), None) | (None, Some(v)) if policy == EdgePolicy::Clamp => {
                for m in a..=b { column[m] = v as f32; }
            }
            _ => {}
        }
    }
}

// ----- FFT convolution -------------------------------------------------------------------

/// Zero-padded FFT convolution of one detector column with a kernel
struct Convolver {
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
    rows: usize,
}

impl Convolver {
    fn new(rows: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            forward: planner.plan_fft_forward(2 * rows),
            inverse: planner.plan_fft_inverse(2 * rows),
            rows,
        }
    }

    fn convolve(&self, mut column: ArrayViewMut1<f32>, kernel: &FilterKernel) {
        let n = 2 * self.rows;
        if n == 0 { return }
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        for (b, &x) in buffer.iter_mut().zip(column.iter()) {
            b.re = x as f64;
        }
        let scratch_len = self.forward.get_inplace_scratch_len().max(self.inverse.get_inplace_scratch_len());
        let mut scratch = vec![Complex64::new(0.0, 0.0); scratch_len];
        self.forward.process_with_scratch(&mut buffer, &mut scratch);
        for (b, &g) in buffer.iter_mut().zip(kernel.gains()) {
            *b *= g as f64;
        }
        self.inverse.process_with_scratch(&mut buffer, &mut scratch);
        let norm = 1.0 / n as f64;
        for (x, b) in column.iter_mut().zip(&buffer) {
            *x = (b.re * norm) as f32;
        }
    }
}
