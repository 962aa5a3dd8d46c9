//! Device geometry of a cone-beam scanner, and the mapping from volume
//! coordinates onto the detector plane.
//!
//! Everything in here is plain arithmetic on millimetres and degrees: this is
//! the code that runs inside the per-voxel loops of the backprojector and of
//! the metal mask generator, which both go through [`View::ray`] and
//! [`View::cell`], so that they are guaranteed to agree on where a voxel lands
//! on the detector.

use ndarray::Array2;

use crate::attributes::{tag, AttributeStore};
use crate::types::{Anglef64, Frame, Lengthf64, Ratiof64, Weightf64, DEGREES};

/// Scanner geometry and calibration, fixed for the lifetime of a scan session.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    /// Detector rows: the transaxial direction, along which projections are filtered
    pub rows: usize,
    /// Detector columns: the axial direction
    pub cols: usize,
    /// Size of one detector pixel
    pub detector_pitch: Lengthf64,
    pub source_to_detector: Lengthf64,
    pub source_to_axis: Lengthf64,
    pub y_offsets: OffsetTable,
    pub z_offsets: OffsetTable,
    /// Tube voltage, selects the beam-hardening polynomial
    pub kvp: u32,
    /// Table feed per rotation. Not used by the reconstruction.
    pub slice_pitch: Lengthf64,
    /// Number of projections announced by the device header
    pub n_projections: usize,
}

impl Geometry {

    /// Read the geometry from the attributes of a device header.
    ///
    /// Missing attributes are not an error: they are taken to be zero, which
    /// gives a degraded (possibly useless) reconstruction rather than none.
    pub fn from_attributes(store: &impl AttributeStore) -> Self {
        let u16_or_zero = |t| store.u16(t).unwrap_or(0) as usize;
        let f64_or_zero = |t| store.f64(t).unwrap_or(0.0);
        let ds_or_zero  = |t| store.decimal(t).unwrap_or(0.0);
        Self {
            rows              : u16_or_zero(tag::ROWS),
            cols              : u16_or_zero(tag::COLUMNS),
            n_projections     : u16_or_zero(tag::NUMBER_OF_FRAMES_IN_ROTATION),
            detector_pitch    : f64_or_zero(tag::SINGLE_COLLIMATION_WIDTH),
            slice_pitch       : f64_or_zero(tag::TABLE_FEED_PER_ROTATION),
            source_to_detector: ds_or_zero (tag::DISTANCE_SOURCE_TO_DETECTOR),
            source_to_axis    : ds_or_zero (tag::DISTANCE_SOURCE_TO_PATIENT),
            z_offsets: OffsetTable::from_values(store.f32s(tag::Z_OFFSETS).unwrap_or_default()),
            y_offsets: OffsetTable::from_values(store.f32s(tag::Y_OFFSETS).unwrap_or_default()),
            kvp: ds_or_zero(tag::KVP) as u32,
        }
    }

    /// Calibration offsets `(y, z)` for a projection taken at `angle`
    pub fn angle_offsets(&self, angle: Anglef64) -> (Lengthf64, Lengthf64) {
        let n = offset_index(angle);
        (self.y_offsets.at(n) as Lengthf64, self.z_offsets.at(n) as Lengthf64)
    }

    /// Per-pixel obliquity weights for this detector. See [`cosine_weight_map`].
    pub fn cosine_weight_map(&self) -> Frame {
        cosine_weight_map(self.rows, self.cols, self.detector_pitch, self.source_to_axis, self.source_to_detector)
    }

    /// Everything needed to map voxels onto the detector at one gantry angle.
    pub fn view(&self, angle: Anglef64) -> View {
        // The +90° aligns the acquisition angle with the reconstruction axes
        let theta = (angle + 90.0).to_radians();
        let (y_offset, z_offset) = self.angle_offsets(angle);
        View {
            cos: theta.cos(),
            sin: theta.sin(),
            y_offset,
            z_offset,
            rows: self.rows,
            cols: self.cols,
            pitch: self.detector_pitch,
            source_to_axis: self.source_to_axis,
            source_to_detector: self.source_to_detector,
        }
    }
}

/// Index into the per-degree offset tables for a projection taken at `angle`.
///
/// The angle is rounded to the nearest degree and turned by 180°, because the
/// recorded angle refers to the tube while the tables refer to the detector.
pub fn offset_index(angle: Anglef64) -> usize {
    let n = (angle + 0.5).floor() as i64 + 180;
    n.rem_euclid(DEGREES as i64) as usize
}

/// Per-pixel weight `sA / sqrt(sA² + y² + z²)`, where `(y, z)` is the position
/// of the pixel centre relative to the middle of the detector, scaled back to
/// the rotation axis.
pub fn cosine_weight_map(
    rows              : usize,
    cols              : usize,
    detector_pitch    : Lengthf64,
    source_to_axis    : Lengthf64,
    source_to_detector: Lengthf64,
) -> Frame {
    let demagnify = source_to_axis / source_to_detector;
    let sa2 = source_to_axis * source_to_axis;
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let y = detector_pitch * (i as f64 - (rows as f64 - 1.0) / 2.0) * demagnify;
        let z = detector_pitch * (j as f64 - (cols as f64 - 1.0) / 2.0) * demagnify;
        (source_to_axis / (sa2 + y * y + z * z).sqrt()) as f32
    })
}

// ----- Calibration offsets ---------------------------------------------------------------

/// One calibration offset (in mm) per integer degree of gantry rotation
#[derive(Clone, Debug, PartialEq)]
pub struct OffsetTable(Box<[f32; DEGREES]>);

impl OffsetTable {

    pub fn zeros() -> Self { Self(Box::new([0.0; DEGREES])) }

    /// Fill the table from however many values are available: missing degrees
    /// are zero, surplus values are ignored.
    pub fn from_values(values: impl IntoIterator<Item = f32>) -> Self {
        let mut table = Self::zeros();
        for (slot, value) in table.0.iter_mut().zip(values) {
            *slot = value;
        }
        table
    }

    pub fn at(&self, degree: usize) -> f32 { self.0[degree % DEGREES] }
}

impl Default for OffsetTable {
    fn default() -> Self { Self::zeros() }
}

// ----- Voxel to detector mapping ---------------------------------------------------------

/// The geometry of a single projection: rotation and calibration offsets for
/// one gantry angle, plus the detector constants needed by [`View::ray`].
#[derive(Clone, Copy, Debug)]
pub struct View {
    cos: f64,
    sin: f64,
    y_offset: Lengthf64,
    z_offset: Lengthf64,
    rows: usize,
    cols: usize,
    pitch: Lengthf64,
    source_to_axis: Lengthf64,
    source_to_detector: Lengthf64,
}

/// Where the column of voxels above in-plane position `(x, y)` lands on the
/// detector. Everything that does not depend on the slice is computed once.
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    /// Fractional detector row
    pub row: f64,
    /// Cone-beam magnification onto the detector
    pub magnification: Ratiof64,
    /// Divergence compensation `(sA / (sA - x_r))²`
    pub weight: Weightf64,
    z_offset: Lengthf64,
    pitch: Lengthf64,
    half_cols: f64,
}

impl View {

    pub fn cos_sin(&self) -> (f64, f64) { (self.cos, self.sin) }

    pub fn ray(&self, x: Lengthf64, y: Lengthf64) -> Ray {
        let x_r =  x * self.cos + y * self.sin;
        let y_r = -x * self.sin + y * self.cos;
        let magnification = self.source_to_detector / (self.source_to_axis + x_r);
        let y_p = y_r * magnification + self.y_offset;
        let row = (self.rows as f64 - 1.0) / 2.0 - y_p / self.pitch;
        let weight = self.source_to_axis / (self.source_to_axis - x_r);
        Ray {
            row,
            magnification,
            weight: weight * weight,
            z_offset: self.z_offset,
            pitch: self.pitch,
            half_cols: (self.cols as f64 - 1.0) / 2.0,
        }
    }

    /// The detector cell containing `(row, col)`, if all four pixels needed
    /// for bilinear interpolation lie in the interior of the detector.
    ///
    /// Rays which miss the interior contribute nothing: that is an expected
    /// consequence of the finite detector, not an error.
    pub fn cell(&self, row: f64, col: f64) -> Option<Cell> {
        if !(row.is_finite() && col.is_finite()) { return None }
        let (fy, fz) = (row.floor(), col.floor());
        let inside = |f: f64, n: usize| f > 0.0 && f < n as f64 - 1.0;
        if !(inside(fy, self.rows) && inside(fz, self.cols)) { return None }
        Some(Cell { row: fy as usize, col: fz as usize, dy: row - fy, dz: col - fz })
    }
}

impl Ray {
    /// Fractional detector column of the voxel at height `z`
    pub fn column(&self, z: Lengthf64) -> f64 {
        (z * self.magnification + self.z_offset) / self.pitch + self.half_cols
    }
}

/// Top-left pixel of a 2×2 detector neighbourhood, with the fractional
/// position inside it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub dy: f64,
    pub dz: f64,
}

impl Cell {
    /// Bilinear interpolation of `frame` at this cell
    #[inline]
    pub fn sample(&self, frame: &Frame) -> f64 {
        let Cell { row: y, col: z, dy, dz } = *self;
        frame[[y    , z    ]] as f64 * (1.0 - dy) * (1.0 - dz) +
        frame[[y + 1, z    ]] as f64 *        dy  * (1.0 - dz) +
        frame[[y    , z + 1]] as f64 * (1.0 - dy) *        dz  +
        frame[[y + 1, z + 1]] as f64 *        dy  *        dz
    }

    /// The four pixels touched by [`Cell::sample`]
    pub fn neighbourhood(&self) -> [[usize; 2]; 4] {
        let Cell { row: y, col: z, .. } = *self;
        [[y, z], [y + 1, z], [y, z + 1], [y + 1, z + 1]]
    }
}
