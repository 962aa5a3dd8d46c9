//! Quantities which are simply type aliases for floats rather than having an
//! implementation as a `uom` `Quantity`.
//!
//! These are the quantities that appear inside the per-voxel loops, where
//! everything is kept in millimetres and degrees, and where `uom` would only
//! get in the way. The aliases still give some clues in the source as to what
//! the numbers represent.

/// Millimetres
pub type Lengthf64      = f64;
/// Degrees
pub type Anglef64       = f64;
/// Dimensionless geometric weights
pub type Weightf64      = f64;
pub type Ratiof64       = f64;
/// Reconstructed (or measured) linear attenuation, as stored in volumes and frames
pub type Attenuationf32 = f32;
/// Raw detector counts
pub type Countu16       = u16;
