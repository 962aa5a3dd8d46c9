//! Read-only access to tagged header attributes.
//!
//! Projection headers carry the scanner geometry as tagged attributes. The
//! [`AttributeStore`] trait gives typed access to them without committing to a
//! container: DICOM objects implement it (see `io::dicom`), and so does a
//! plain `HashMap<Tag, Vec<u8>>`, which is what the tests use.

use std::borrow::Cow;
use std::collections::HashMap;

pub use dicom::core::Tag;

/// Tags read by the reconstruction.
///
/// Several of these live in the vendor's private group `0009`, which no
/// dictionary knows about, so all of them are spelled out here.
pub mod tag {
    use super::Tag;
    pub const IMAGE_TYPE                  : Tag = Tag(0x0008, 0x0008);
    pub const KVP                         : Tag = Tag(0x0018, 0x0060);
    pub const DISTANCE_SOURCE_TO_DETECTOR : Tag = Tag(0x0018, 0x1110);
    pub const DISTANCE_SOURCE_TO_PATIENT  : Tag = Tag(0x0018, 0x1111);
    pub const SINGLE_COLLIMATION_WIDTH    : Tag = Tag(0x0018, 0x9306);
    pub const TABLE_FEED_PER_ROTATION     : Tag = Tag(0x0018, 0x9310);
    pub const ROWS                        : Tag = Tag(0x0028, 0x0010);
    pub const COLUMNS                     : Tag = Tag(0x0028, 0x0011);
    pub const NUMBER_OF_FRAMES_IN_ROTATION: Tag = Tag(0x0054, 0x0053);
    pub const PIXEL_DATA                  : Tag = Tag(0x7FE0, 0x0010);

    /// Gantry angle of a projection, FD
    pub const PROJECTION_ANGLE            : Tag = Tag(0x0009, 0x1036);
    /// Axial calibration offset per degree, 360 × FL
    pub const Z_OFFSETS                   : Tag = Tag(0x0009, 0x1046);
    /// Transaxial calibration offset per degree, 360 × FL
    pub const Y_OFFSETS                   : Tag = Tag(0x0009, 0x1047);
}

/// Typed, read-only access to tagged attributes.
///
/// Only [`raw`](AttributeStore::raw) is required. Binary values are little
/// endian; decimal strings are ASCII, possibly multi-valued (`\`-separated)
/// and padded.
pub trait AttributeStore {

    fn raw(&self, tag: Tag) -> Option<Cow<'_, [u8]>>;

    fn u16(&self, tag: Tag) -> Option<u16> { le_u16(&self.raw(tag)?) }

    fn f64(&self, tag: Tag) -> Option<f64> { le_f64(&self.raw(tag)?) }

    fn f32s(&self, tag: Tag) -> Option<Vec<f32>> { Some(le_f32s(&self.raw(tag)?)) }

    /// First value of a decimal string
    fn decimal(&self, tag: Tag) -> Option<f64> {
        parse_decimal_string(&self.text(tag)?)
    }

    fn text(&self, tag: Tag) -> Option<String> {
        let bytes = self.raw(tag)?;
        Some(String::from_utf8_lossy(&bytes)
             .trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
             .to_string())
    }
}

impl AttributeStore for HashMap<Tag, Vec<u8>> {
    fn raw(&self, tag: Tag) -> Option<Cow<'_, [u8]>> {
        self.get(&tag).map(|v| Cow::Borrowed(v.as_slice()))
    }
}

pub(crate) fn le_u16(bytes: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(..2)?.try_into().ok()?))
}

pub(crate) fn le_f64(bytes: &[u8]) -> Option<f64> {
    Some(f64::from_le_bytes(bytes.get(..8)?.try_into().ok()?))
}

pub(crate) fn le_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub(crate) fn parse_decimal_string(s: &str) -> Option<f64> {
    s.split('\\').next()?.trim().parse().ok()
}
