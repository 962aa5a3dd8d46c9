//! Projections stored as a directory of DICOM files, one frame per file.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use ::dicom::core::VR;
use ::dicom::object::{open_file, DefaultDicomObject, InMemDicomObject};
use ndarray::Array2;
use tracing::{debug, info};

use crate::attributes::{le_f32s, le_f64, le_u16, parse_decimal_string, tag, AttributeStore, Tag};
use crate::geometry::Geometry;
use crate::source::{FrameKind, ProjectionSource, RawFrame, SourceError};

/// Only files whose names start with the vendor's instance UID root hold
/// projections
pub const INSTANCE_PREFIX: &str = "1.3.6.1.4.1";

/// Private attributes read with an implicit transfer syntax have no known VR
/// and arrive as UN: those are decoded from their raw little-endian bytes.
/// Everything else goes through the typed accessors.
impl AttributeStore for InMemDicomObject {

    fn raw(&self, tag: Tag) -> Option<Cow<'_, [u8]>> {
        self.element(tag).ok()?.to_bytes().ok()
    }

    fn u16(&self, tag: Tag) -> Option<u16> {
        match self.element(tag).ok()? {
            e if e.vr() == VR::UN => le_u16(&e.to_bytes().ok()?),
            e                     => e.to_int::<u16>().ok(),
        }
    }

    fn f64(&self, tag: Tag) -> Option<f64> {
        match self.element(tag).ok()? {
            e if e.vr() == VR::UN => le_f64(&e.to_bytes().ok()?),
            e                     => e.to_float64().ok(),
        }
    }

    fn f32s(&self, tag: Tag) -> Option<Vec<f32>> {
        match self.element(tag).ok()? {
            e if e.vr() == VR::UN => Some(le_f32s(&e.to_bytes().ok()?)),
            e                     => e.to_multi_float32().ok(),
        }
    }

    fn decimal(&self, tag: Tag) -> Option<f64> {
        match self.element(tag).ok()? {
            e if e.vr() == VR::UN => parse_decimal_string(&self.text(tag)?),
            e                     => e.to_float64().ok(),
        }
    }

    fn text(&self, tag: Tag) -> Option<String> {
        let element = self.element(tag).ok()?;
        let text = match element.vr() {
            VR::UN => String::from_utf8_lossy(&element.to_bytes().ok()?).into_owned(),
            _      => element.to_str().ok()?.into_owned(),
        };
        Some(text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
    }
}

pub struct DicomDirectorySource {
    paths: Vec<PathBuf>,
    cursor: usize,
    geometry: Geometry,
    header: DefaultDicomObject,
}

impl DicomDirectorySource {

    /// Collect the projection files in `dir`, in name order, and read the
    /// geometry from the first one.
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(INSTANCE_PREFIX)))
            .collect();
        paths.sort();

        let first = paths.first().ok_or_else(|| SourceError::Empty(dir.to_path_buf()))?;
        let header = open(first)?;
        let geometry = Geometry::from_attributes(&*header);
        info!("Found {} projection files in {}: {}×{} detector at {} kV",
              paths.len(), dir.display(), geometry.rows, geometry.cols, geometry.kvp);
        Ok(Self { paths, cursor: 0, geometry, header })
    }

    /// Header of the first file: source of patient and study attributes
    pub fn header(&self) -> &InMemDicomObject { &self.header }

    pub fn geometry_mut(&mut self) -> &mut Geometry { &mut self.geometry }

    pub fn len(&self) -> usize { self.paths.len() }
    pub fn is_empty(&self) -> bool { self.paths.is_empty() }
}

impl ProjectionSource for DicomDirectorySource {

    fn geometry(&self) -> &Geometry { &self.geometry }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, SourceError> {
        let Some(path) = self.paths.get(self.cursor) else { return Ok(None) };
        self.cursor += 1;
        let object = open(path)?;
        let frame = read_frame(&object, self.geometry.rows, self.geometry.cols)
            .map_err(|e| match e {
                FrameError::NoPixels => SourceError::MissingPixelData { path: path.clone() },
                FrameError::Short(got) => SourceError::Shape { got, rows: self.geometry.rows, cols: self.geometry.cols },
            })?;
        debug!("{}: {:?} at {:.3}°", path.display(), frame.kind, frame.angle);
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.cursor = 0;
        Ok(())
    }

    fn total(&self) -> usize {
        match self.geometry.n_projections {
            0 => self.paths.len(),
            n => n,
        }
    }
}

fn open(path: &Path) -> Result<DefaultDicomObject, SourceError> {
    open_file(path).map_err(|source| SourceError::Dicom { path: path.to_path_buf(), source })
}

enum FrameError { NoPixels, Short(usize) }

fn read_frame(object: &InMemDicomObject, rows: usize, cols: usize) -> Result<RawFrame, FrameError> {
    let kind = match object.text(tag::IMAGE_TYPE) {
        Some(t) if t.contains("BLANK SCAN") => FrameKind::Blank,
        _                                   => FrameKind::Projection,
    };
    let angle = object.f64(tag::PROJECTION_ANGLE).unwrap_or(0.0);
    let bytes = object.raw(tag::PIXEL_DATA).ok_or(FrameError::NoPixels)?;
    let pixels: Vec<u16> = bytes
        .chunks_exact(2)
        .take(rows * cols)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect();
    let got = pixels.len();
    let pixels = Array2::from_shape_vec((rows, cols), pixels).map_err(|_| FrameError::Short(got))?;
    Ok(RawFrame { kind, angle, pixels })
}
