//! Write a reconstructed volume as a multi-frame DICOM CT image

use std::path::Path;

use ::dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use ::dicom::object::{FileMetaTableBuilder, InMemDicomObject, WithMetaError, WriteError};
use dicom_dictionary_std::{tags, uids};
use itertools::iproduct;
use thiserror::Error;
use tracing::info;

use crate::volume::Volume;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("cannot build file meta group: {0}")]
    Meta(#[from] WithMetaError),

    #[error("cannot write DICOM file: {0}")]
    Write(#[from] WriteError),

    #[error("{slices}×{rows}×{cols} volume does not fit 16-bit DICOM dimensions")]
    TooLarge { slices: usize, rows: usize, cols: usize },
}

/// Attributes copied verbatim from the projection header, when present
const FROM_PROJECTIONS: [Tag; 30] = [
    tags::PATIENT_NAME,
    tags::PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::PATIENT_SIZE,
    tags::PATIENT_WEIGHT,
    tags::STUDY_INSTANCE_UID,
    tags::STUDY_ID,
    tags::STUDY_DATE,
    tags::STUDY_TIME,
    tags::STUDY_DESCRIPTION,
    tags::ACCESSION_NUMBER,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::SERIES_NUMBER,
    tags::ACQUISITION_NUMBER,
    tags::ACQUISITION_DATE_TIME,
    tags::MANUFACTURER,
    tags::MANUFACTURER_MODEL_NAME,
    tags::STATION_NAME,
    tags::KVP,
    tags::DISTANCE_SOURCE_TO_DETECTOR,
    tags::DISTANCE_SOURCE_TO_PATIENT,
    tags::GANTRY_DETECTOR_TILT,
    tags::TABLE_HEIGHT,
    tags::ROTATION_DIRECTION,
    tags::EXPOSURE_TIME,
    tags::EXPOSURE,
    tags::FILTER_TYPE,
    tags::PATIENT_POSITION,
    tags::X_RAY_TUBE_CURRENT,
];

/// The series and acquisition date and time are those of the study
const STUDY_DATE_AND_TIME: [(Tag, Tag, VR); 4] = [
    (tags::STUDY_DATE, tags::SERIES_DATE     , VR::DA),
    (tags::STUDY_DATE, tags::ACQUISITION_DATE, VR::DA),
    (tags::STUDY_TIME, tags::SERIES_TIME     , VR::TM),
    (tags::STUDY_TIME, tags::ACQUISITION_TIME, VR::TM),
];

/// Stored pixel values are attenuation × 100, clipped to `u16`
pub const PIXEL_SCALE: f32 = 100.0;

pub const SERIES_DESCRIPTION: &str = "CT recon";

/// Patient x and y run opposite to the volume's columns and rows
pub const IMAGE_ORIENTATION: &str = "-1\\0\\0\\0\\-1\\0";

/// Fresh UID under the UUID-derived root
pub fn new_uid() -> String {
    format!("2.25.{}", rand::random::<u128>())
}

/// Frames of the exported image, in file order: slices and rows are both
/// reversed with respect to the volume.
pub fn pixel_values(volume: &Volume) -> Vec<u16> {
    let [slices, rows, cols] = volume.dims();
    let data = volume.data();
    iproduct!((0..slices).rev(), (0..rows).rev(), 0..cols)
        .map(|(i, j, k)| (PIXEL_SCALE * data[[i, j, k]]).max(0.0) as u16)
        .collect()
}

pub fn write_dicom_series(volume: &Volume, template: Option<&InMemDicomObject>, path: &Path) -> Result<(), ExportError> {
    let [slices, rows, cols] = volume.dims();
    let too_large = || ExportError::TooLarge { slices, rows, cols };
    let n_slices = u16::try_from(slices).map_err(|_| too_large())?;
    let n_rows   = u16::try_from(rows  ).map_err(|_| too_large())?;
    let n_cols   = u16::try_from(cols  ).map_err(|_| too_large())?;
    let res = volume.resolution();
    let sop_instance_uid = new_uid();

    let mut obj = InMemDicomObject::new_empty();
    if let Some(template) = template {
        for tag in FROM_PROJECTIONS {
            if let Ok(element) = template.element(tag) {
                obj.put(element.clone());
            }
        }
        for (from, to, vr) in STUDY_DATE_AND_TIME {
            if let Some(value) = template.element(from).ok().and_then(|e| e.value().primitive()) {
                obj.put(DataElement::new(to, vr, value.clone()));
            }
        }
    }
    if obj.element(tags::STUDY_INSTANCE_UID).is_err() {
        obj.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(new_uid())));
    }

    let (x0, y0, z0) = (res * cols as f64 / 2.0, res * rows as f64 / 2.0, res * slices as f64 / 2.0);
    let mut put = |tag, vr, value: PrimitiveValue| { obj.put(DataElement::new(tag, vr, value)); };
    put(tags::SOP_CLASS_UID             , VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE));
    put(tags::SOP_INSTANCE_UID          , VR::UI, PrimitiveValue::from(sop_instance_uid.as_str()));
    put(tags::SERIES_INSTANCE_UID       , VR::UI, PrimitiveValue::from(new_uid()));
    put(tags::FRAME_OF_REFERENCE_UID    , VR::UI, PrimitiveValue::from(new_uid()));
    put(tags::MODALITY                  , VR::CS, PrimitiveValue::from("CT"));
    put(tags::IMAGE_TYPE                , VR::CS, PrimitiveValue::from("DERIVED\\SECONDARY\\AXIAL"));
    put(tags::SERIES_DESCRIPTION        , VR::LO, PrimitiveValue::from(SERIES_DESCRIPTION));
    put(tags::PROTOCOL_NAME             , VR::LO, PrimitiveValue::from("CT"));
    put(tags::SOFTWARE_VERSIONS         , VR::LO, PrimitiveValue::from(concat!("conebeam ", env!("CARGO_PKG_VERSION"))));
    put(tags::SLICE_THICKNESS           , VR::DS, PrimitiveValue::from(format!("{res:.2}")));
    put(tags::SPACING_BETWEEN_SLICES    , VR::DS, PrimitiveValue::from(format!("{:.2}", -res)));
    put(tags::SPATIAL_RESOLUTION        , VR::DS, PrimitiveValue::from(format!("{res:.2}")));
    put(tags::IMAGE_POSITION_PATIENT    , VR::DS, PrimitiveValue::from(format!("{x0:.3}\\{y0:.3}\\{z0:.3}")));
    put(tags::IMAGE_ORIENTATION_PATIENT , VR::DS, PrimitiveValue::from(IMAGE_ORIENTATION));
    put(tags::SLICE_LOCATION            , VR::DS, PrimitiveValue::from("0"));
    put(tags::SAMPLES_PER_PIXEL         , VR::US, PrimitiveValue::from(1_u16));
    put(tags::PHOTOMETRIC_INTERPRETATION, VR::CS, PrimitiveValue::from("MONOCHROME2"));
    put(tags::NUMBER_OF_FRAMES          , VR::IS, PrimitiveValue::from(slices.to_string()));
    put(tags::FRAME_INCREMENT_POINTER   , VR::AT, PrimitiveValue::Tags(vec![tags::SLICE_VECTOR].into()));
    put(tags::ROWS                      , VR::US, PrimitiveValue::from(n_rows));
    put(tags::COLUMNS                   , VR::US, PrimitiveValue::from(n_cols));
    put(tags::PIXEL_SPACING             , VR::DS, PrimitiveValue::from(format!("{res:.2}\\{res:.2}")));
    put(tags::BITS_ALLOCATED            , VR::US, PrimitiveValue::from(16_u16));
    put(tags::BITS_STORED               , VR::US, PrimitiveValue::from(16_u16));
    put(tags::HIGH_BIT                  , VR::US, PrimitiveValue::from(15_u16));
    put(tags::PIXEL_REPRESENTATION      , VR::US, PrimitiveValue::from(0_u16));
    put(tags::SLICE_VECTOR              , VR::US, PrimitiveValue::U16((1..=n_slices).collect()));
    put(tags::NUMBER_OF_SLICES          , VR::US, PrimitiveValue::from(n_slices));
    put(tags::PIXEL_DATA                , VR::OW, PrimitiveValue::U16(pixel_values(volume).into()));

    let file = obj.with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str()),
    )?;
    file.write_to_file(path)?;
    info!("Wrote {slices} frames of {rows}×{cols} to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeStore;
    use ::dicom::object::open_file;
    use float_eq::assert_float_eq;

    fn volume() -> Volume {
        let mut v = Volume::zeros([2, 2, 3], 0.25);
        for (n, x) in v.data_mut().iter_mut().enumerate() {
            *x = n as f32 - 2.0;
        }
        v
    }

    #[test]
    fn pixels_are_scaled_clipped_and_flipped() {
        // Volume values are n - 2 for n = 0..12, [slice][row][col]
        let expected: Vec<u16> = vec![
            700, 800, 900,   400, 500, 600,  // slice 1, rows reversed
            100, 200, 300,     0,   0,   0,  // slice 0, rows reversed
        ];
        assert_eq!(pixel_values(&volume()), expected);

        let mut v = Volume::zeros([1, 1, 1], 1.0);
        v.data_mut()[[0, 0, 0]] = 1e6;
        assert_eq!(pixel_values(&v), vec![u16::MAX]);
    }

    #[test]
    fn uids_are_fresh() {
        let (a, b) = (new_uid(), new_uid());
        assert!(a.starts_with("2.25."));
        assert_ne!(a, b);
        assert!(a.len() <= 64);
    }

    #[test]
    fn dicom_export_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("recon.dcm");

        let mut template = InMemDicomObject::new_empty();
        let mut put = |tag, vr, value: &str| template.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
        put(tags::PATIENT_ID                 , VR::LO, "PHANTOM-7");
        put(tags::KVP                        , VR::DS, "55");
        put(tags::DISTANCE_SOURCE_TO_DETECTOR, VR::DS, "330.5");
        put(tags::DISTANCE_SOURCE_TO_PATIENT , VR::DS, "110");
        put(tags::MANUFACTURER               , VR::LO, "Bioscan");
        put(tags::STATION_NAME               , VR::SH, "NANOSPECT");
        put(tags::STUDY_DATE                 , VR::DA, "20240102");
        put(tags::STUDY_TIME                 , VR::TM, "101500");

        write_dicom_series(&volume(), Some(&template), &path)?;

        let file = open_file(&path)?;
        let obj: &InMemDicomObject = &file;
        assert_eq!(obj.u16(tags::ROWS), Some(2));
        assert_eq!(obj.u16(tags::COLUMNS), Some(3));
        assert_eq!(obj.decimal(tags::NUMBER_OF_FRAMES), Some(2.0));
        assert_eq!(obj.u16(tags::NUMBER_OF_SLICES), Some(2));
        assert_eq!(obj.element(tags::SLICE_VECTOR)?.to_multi_int::<u16>()?, vec![1, 2]);
        assert_eq!(obj.text(tags::PHOTOMETRIC_INTERPRETATION).as_deref(), Some("MONOCHROME2"));
        assert!(obj.text(tags::STUDY_INSTANCE_UID).is_some_and(|uid| uid.starts_with("2.25.")));

        // Geometry of the reconstructed volume
        assert_float_eq!(obj.decimal(tags::SLICE_THICKNESS).unwrap(), 0.25, ulps <= 1);
        assert_float_eq!(obj.decimal(tags::SPACING_BETWEEN_SLICES).unwrap(), -0.25, ulps <= 1);
        assert_eq!(obj.text(tags::PIXEL_SPACING).as_deref(), Some("0.25\\0.25"));
        assert_eq!(obj.text(tags::IMAGE_POSITION_PATIENT).as_deref(), Some("0.375\\0.250\\0.250"));
        assert_eq!(obj.text(tags::IMAGE_ORIENTATION_PATIENT).as_deref(), Some(IMAGE_ORIENTATION));

        // Acquisition attributes come from the projections
        assert_eq!(obj.text(tags::PATIENT_ID).as_deref(), Some("PHANTOM-7"));
        assert_eq!(obj.decimal(tags::KVP), Some(55.0));
        assert_eq!(obj.decimal(tags::DISTANCE_SOURCE_TO_DETECTOR), Some(330.5));
        assert_eq!(obj.decimal(tags::DISTANCE_SOURCE_TO_PATIENT), Some(110.0));
        assert_eq!(obj.text(tags::MANUFACTURER).as_deref(), Some("Bioscan"));
        assert_eq!(obj.text(tags::STATION_NAME).as_deref(), Some("NANOSPECT"));
        assert_eq!(obj.text(tags::SERIES_DATE).as_deref(), Some("20240102"));
        assert_eq!(obj.text(tags::ACQUISITION_TIME).as_deref(), Some("101500"));
        assert_eq!(obj.text(tags::SERIES_DESCRIPTION).as_deref(), Some(SERIES_DESCRIPTION));
        assert!(obj.text(tags::SOFTWARE_VERSIONS).is_some_and(|s| s.starts_with("conebeam ")));

        let bytes = obj.raw(tags::PIXEL_DATA).unwrap();
        let pixels: Vec<u16> = bytes.chunks_exact(2).map(|b| u16::from_le_bytes([b[0], b[1]])).collect();
        assert_eq!(pixels, pixel_values(&volume()));
        Ok(())
    }

    #[test]
    fn oversized_volume_is_refused() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wide.dcm");
        let wide = Volume::zeros([1, 1, 70_000], 0.5);
        let result = write_dicom_series(&wide, None, &path);
        assert!(matches!(result, Err(ExportError::TooLarge { slices: 1, rows: 1, cols: 70_000 })));
        assert!(!path.exists());
        Ok(())
    }
}
