//! Where projections come from.
//!
//! A [`ProjectionSource`] yields raw detector frames in acquisition order,
//! interleaved with any blank (air) calibration scans, and can be restarted
//! so that several reconstruction passes see the same data.

use std::path::PathBuf;

use ndarray::Array2;
use thiserror::Error;

use crate::geometry::Geometry;
use crate::types::{Anglef64, Countu16};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Air scan, used as the unattenuated reference
    Blank,
    Projection,
}

/// One detector readout, before any normalization
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pub kind: FrameKind,
    /// Gantry angle in degrees
    pub angle: Anglef64,
    pub pixels: Array2<Countu16>,
}

impl RawFrame {
    pub fn projection(angle: Anglef64, pixels: Array2<Countu16>) -> Self {
        Self { kind: FrameKind::Projection, angle, pixels }
    }

    pub fn blank(pixels: Array2<Countu16>) -> Self {
        Self { kind: FrameKind::Blank, angle: 0.0, pixels }
    }

    pub fn is_blank(&self) -> bool { self.kind == FrameKind::Blank }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read {path}: {source}")]
    Dicom { path: PathBuf, #[source] source: dicom::object::ReadError },

    #[error("{path} has no pixel data")]
    MissingPixelData { path: PathBuf },

    #[error("frame has {got} pixels, detector has {rows}×{cols}")]
    Shape { got: usize, rows: usize, cols: usize },

    #[error("no projection files in {0}")]
    Empty(PathBuf),
}

pub trait ProjectionSource {

    /// Scanner geometry of this acquisition
    fn geometry(&self) -> &Geometry;

    /// The next frame in acquisition order, `None` once exhausted
    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError>;

    /// Start again from the first frame
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// Number of projections expected in one pass, for progress reporting
    fn total(&self) -> usize { self.geometry().n_projections }
}

// ----- In-memory source ------------------------------------------------------------------

/// Frames held in memory. Used for synthetic acquisitions.
#[derive(Clone, Debug)]
pub struct MemorySource {
    geometry: Geometry,
    frames: Vec<RawFrame>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(geometry: Geometry, frames: Vec<RawFrame>) -> Self {
        Self { geometry, frames, cursor: 0 }
    }

    pub fn frames(&self) -> &[RawFrame] { &self.frames }
}

impl ProjectionSource for MemorySource {

    fn geometry(&self) -> &Geometry { &self.geometry }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() { self.cursor += 1; }
        Ok(frame)
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.cursor = 0;
        Ok(())
    }

    fn total(&self) -> usize {
        match self.geometry.n_projections {
            0 => self.frames.iter().filter(|f| !f.is_blank()).count(),
            n => n,
        }
    }
}
