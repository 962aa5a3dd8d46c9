//! Greyscale rendering of volume slices

use std::path::Path;

use image::{GrayImage, ImageResult, Luma};

use crate::types::Slice;

/// Map a slice onto 8-bit grey levels, scaled to its own maximum.
///
/// Non-positive values (and every pixel of a slice with no positive values)
/// are black.
pub fn slice_to_image(slice: &Slice) -> GrayImage {
    let (rows, cols) = slice.dim();
    let max = slice.iter().cloned().fold(0.0_f32, f32::max);
    GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = slice[[y as usize, x as usize]];
        let level = if max > 0.0 && v > 0.0 { (255.0 * v / max) as u8 } else { 0 };
        Luma([level])
    })
}

pub fn save_slice_png(slice: &Slice, path: &Path) -> ImageResult<()> {
    slice_to_image(slice).save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn grey_levels_scale_to_maximum() {
        let slice = array![[0.0, 1.0, 2.0],
                           [-3.0, 4.0, f32::NAN]];
        let img = slice_to_image(&slice);
        assert_eq!(img.dimensions(), (3, 2));
        let levels: Vec<u8> = img.pixels().map(|p| p.0[0]).collect();
        assert_eq!(levels, vec![0, 63, 127, 0, 255, 0]);
    }

    #[test]
    fn empty_slice_is_black() {
        let img = slice_to_image(&Slice::zeros((2, 2)));
        assert!(img.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn png_roundtrip() -> ImageResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("slice.png");
        let slice = array![[1.0, 0.5], [0.0, 0.25]];
        save_slice_png(&slice, &path)?;
        let back = image::open(&path)?.into_luma8();
        assert_eq!(back, slice_to_image(&slice));
        Ok(())
    }
}
