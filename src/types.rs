pub use units::todo::{Anglef64, Attenuationf32, Countu16, Lengthf64, Ratiof64, Weightf64};
pub use units::{ElectricPotential, Length};

#[allow(non_camel_case_types)] pub type Index3_u = [usize; 3];
/// Volume extent in voxels: `[slices, rows, cols]`
#[allow(non_camel_case_types)] pub type VolumeDim_u = [usize; 3];

/// Detector frame: `rows` × `cols` attenuation samples
pub type Frame = ndarray::Array2<Attenuationf32>;
/// Detector pixels to be filled in by interpolation
pub type DetectorMask = ndarray::Array2<bool>;
/// One `rows` × `cols` plane of a volume
pub type Slice = ndarray::Array2<Attenuationf32>;

/// Number of entries in the per-degree calibration offset tables
pub const DEGREES: usize = 360;
