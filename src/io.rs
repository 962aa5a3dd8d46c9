//! Reading projections and writing reconstructions

pub mod raw;
pub mod dicom;
pub mod export;
