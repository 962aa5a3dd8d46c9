//! Voxel grid holding the reconstructed attenuation coefficients.
//!
//! Axes are `[slice, row, col]` ↔ `[z, y, x]`, with the rotation axis through
//! the centre of the grid.

use std::path::Path;

use ndarray::{Array3, Axis};
use thiserror::Error;

use crate::io;
use crate::types::{Index3_u, Lengthf64, Slice, VolumeDim_u};

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path} holds {got} voxels, expected {expected}")]
    Size { path: String, got: usize, expected: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    resolution: Lengthf64,
}

/// Physical centres of the voxels along each axis
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinates {
    pub x: Vec<Lengthf64>,
    pub y: Vec<Lengthf64>,
    pub z: Vec<Lengthf64>,
}

impl Volume {

    pub fn zeros([slices, rows, cols]: VolumeDim_u, resolution: Lengthf64) -> Self {
        Self { data: Array3::zeros((slices, rows, cols)), resolution }
    }

    /// Load a volume previously saved with [`Volume::write_raw`]
    pub fn from_raw_file(dims: VolumeDim_u, resolution: Lengthf64, path: &Path) -> Result<Self, VolumeError> {
        let values: Vec<f32> = io::raw::read(path)?.collect::<Result<_, _>>()?;
        let expected = dims.iter().product();
        if values.len() != expected {
            return Err(VolumeError::Size { path: path.display().to_string(), got: values.len(), expected })
        }
        let [slices, rows, cols] = dims;
        let data = Array3::from_shape_vec((slices, rows, cols), values)
            .map_err(|_| VolumeError::Size { path: path.display().to_string(), got: 0, expected })?;
        Ok(Self { data, resolution })
    }

    /// Slice-major, row-major `f32` little endian
    pub fn write_raw(&self, path: &Path) -> std::io::Result<()> {
        io::raw::write(self.data.iter().copied(), path)
    }

    pub fn dims(&self) -> VolumeDim_u {
        let (s, r, c) = self.data.dim();
        [s, r, c]
    }

    pub fn slices(&self) -> usize { self.data.len_of(Axis(0)) }
    pub fn rows  (&self) -> usize { self.data.len_of(Axis(1)) }
    pub fn cols  (&self) -> usize { self.data.len_of(Axis(2)) }

    pub fn resolution(&self) -> Lengthf64 { self.resolution }

    pub fn data    (&    self) -> &    Array3<f32> { &    self.data }
    pub fn data_mut(&mut self) -> &mut Array3<f32> { &mut self.data }

    pub fn clear(&mut self) { self.data.fill(0.0); }

    pub fn coordinates(&self) -> Coordinates {
        let axis = |n: usize| -> Vec<Lengthf64> {
            let centre = (n as f64 - 1.0) / 2.0;
            (0..n).map(|i| self.resolution * (i as f64 - centre)).collect()
        };
        Coordinates { x: axis(self.cols()), y: axis(self.rows()), z: axis(self.slices()) }
    }

    /// Index of the slice shown while a reconstruction is running
    pub fn central_index(&self) -> usize { self.slices() / 2 }

    pub fn central_slice(&self) -> Slice {
        self.data.index_axis(Axis(0), self.central_index()).to_owned()
    }

    /// Indices of all voxels whose value exceeds `threshold`
    pub fn voxels_above(&self, threshold: f32) -> Vec<Index3_u> {
        self.data
            .indexed_iter()
            .filter(|(_, &v)| v > threshold)
            .map(|((i, j, k), _)| [i, j, k])
            .collect()
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Index of the largest voxel
    pub fn argmax(&self) -> Option<Index3_u> {
        self.data
            .indexed_iter()
            .fold(None, |best: Option<((usize, usize, usize), f32)>, (index, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((index, v)),
            })
            .map(|((i, j, k), _)| [i, j, k])
    }
}
