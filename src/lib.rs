//! Cone-beam CT reconstruction: filtered backprojection (FDK) with metal
//! artifact removal, for scanners which deliver one DICOM file per projection.

mod types;
pub use types::*;

pub mod attributes;
pub mod geometry;
pub mod filter;
pub mod beam_hardening;
pub mod source;
pub mod projection;
pub mod volume;
pub mod monitor;
pub mod reconstruction;
pub mod metal;
pub mod session;
pub mod config;
pub mod io;
pub mod visualize;
pub mod utils;
