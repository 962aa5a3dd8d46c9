//! Physical quantities which cross the boundaries of the reconstruction
//! engine: configuration files, command line arguments and device headers.
//!
//! Inside the engine everything is converted to plain floats in millimetres
//! (see [`todo`]); the conversion happens in exactly one place, via the `*_`
//! accessors defined here.

pub mod todo;

pub use uom;

pub use uom::si::f64::{ElectricPotential, Length};

use uom::si::{
    electric_potential::kilovolt,
    length::{centimeter, micrometer, millimeter},
};

// Making values from float literals is very long-winded in `uom`, so provide
// some pithily-named convenience constructors ...
pub fn mm(x: f64) -> Length            { Length::new::<millimeter>(x) }
pub fn cm(x: f64) -> Length            { Length::new::<centimeter>(x) }
pub fn um(x: f64) -> Length            { Length::new::<micrometer>(x) }
pub fn kv(x: f64) -> ElectricPotential { ElectricPotential::new::<kilovolt>(x) }

// ... and their inverses, which strip the units in the conventions used by the
// engine's inner loops.
pub fn mm_(x: Length)            -> f64 { x.get::<millimeter>() }
pub fn kv_(x: ElectricPotential) -> f64 { x.get::<kilovolt>() }
