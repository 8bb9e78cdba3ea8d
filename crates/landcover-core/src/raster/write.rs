//! Multi-band GeoTIFF output.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use log::info;
use tiff::encoder::colortype::{ColorType, Gray32Float, GrayI16};
use tiff::encoder::compression::Lzw;
use tiff::encoder::TiffEncoder;
use tiff::TiffResult;

use super::{write_nodata, RasterMeta};
use crate::error::{Error, Result};
use crate::pixels::{BorderMask, BORDER_SENTINEL};
use crate::stack::BandStack;

/// Write `stack` as an i16 raster shaped like `meta`, one LZW-compressed
/// directory per band, with the border sentinel added into every band.
///
/// Layer shapes are validated before the destination is created, so a
/// `ShapeMismatch` never leaves a partial file behind.
pub fn write_stack(
    path: impl AsRef<Path>,
    stack: &BandStack,
    border: &BorderMask,
    meta: &RasterMeta,
) -> Result<()> {
    let path = path.as_ref();
    let grids = stack.to_grids(border, meta.height, meta.width)?;
    let bands: Vec<Vec<i16>> = grids.iter().map(|g| g.iter().copied().collect()).collect();
    write_bands::<GrayI16>(path, &bands, meta, f64::from(BORDER_SENTINEL))?;
    info!("wrote {} band(s) to {}", bands.len(), path.display());
    Ok(())
}

/// Write row-major f32 planes, one directory per plane.
pub fn write_float_bands(
    path: impl AsRef<Path>,
    planes: &[Vec<f32>],
    meta: &RasterMeta,
    nodata: f64,
) -> Result<()> {
    let path = path.as_ref();
    let n = meta.pixel_count();
    for (i, plane) in planes.iter().enumerate() {
        if plane.len() != n {
            return Err(Error::ShapeMismatch {
                layer: format!("band {}", i + 1),
                len: plane.len(),
                height: meta.height,
                width: meta.width,
            });
        }
    }
    write_bands::<Gray32Float>(path, planes, meta, nodata)?;
    info!("wrote {} band(s) to {}", planes.len(), path.display());
    Ok(())
}

fn write_bands<C>(
    path: &Path,
    bands: &[Vec<C::Inner>],
    meta: &RasterMeta,
    nodata: f64,
) -> Result<()>
where
    C: ColorType,
    [C::Inner]: tiff::encoder::TiffValue,
{
    let file = File::create(path).map_err(|e| Error::write(path, e))?;
    let mut writer = BufWriter::new(file);
    encode::<C, _>(&mut writer, bands, meta, nodata).map_err(|e| Error::write(path, e))?;
    writer.flush().map_err(|e| Error::write(path, e))
}

fn encode<C, W>(
    writer: &mut W,
    bands: &[Vec<C::Inner>],
    meta: &RasterMeta,
    nodata: f64,
) -> TiffResult<()>
where
    C: ColorType,
    [C::Inner]: tiff::encoder::TiffValue,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer)?;
    for band in bands {
        let mut image = encoder.new_image_with_compression::<C, _>(
            meta.width as u32,
            meta.height as u32,
            Lzw::default(),
        )?;
        meta.geo.write_to(image.encoder())?;
        write_nodata(image.encoder(), nodata)?;
        image.write_data(band)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Mask;
    use crate::pixels::ReflectanceScale;
    use crate::raster::{probe, read_planes, read_raster, GeoTags};

    fn meta_2x2() -> RasterMeta {
        let mut meta = RasterMeta::new(2, 2, 8);
        meta.geo = GeoTags {
            pixel_scale: Some(vec![2.0, 2.0, 0.0]),
            tiepoint: Some(vec![0.0, 0.0, 0.0, 500000.0, 1_300_000.0, 0.0]),
            key_directory: Some(vec![1, 1, 0, 1, 3072, 0, 1, 3031]),
            ..GeoTags::default()
        };
        meta
    }

    #[test]
    fn stack_round_trips_with_sentinel_and_geotags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene_endmember.tif");
        let mut stack = BandStack::new();
        stack.push_mask("a", &Mask::from_values(&[1, 0, 1, 1]));
        stack.push_empty("b", 4);
        stack.push_mask("c", &Mask::from_values(&[0, 1, 1, 0]));
        let border = BorderMask::from_values(vec![-99, 0, 0, 0]);

        write_stack(&path, &stack, &border, &meta_2x2()).unwrap();

        let (planes, meta) = read_planes(&path).unwrap();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0], vec![-98.0, 0.0, 1.0, 1.0]);
        assert_eq!(planes[1], vec![-99.0, 0.0, 0.0, 0.0]);
        assert_eq!(planes[2], vec![-99.0, 1.0, 1.0, 0.0]);
        assert_eq!(meta.nodata, Some(-99.0));
        assert_eq!(meta.geo, meta_2x2().geo);
        assert_eq!(meta.sample_type, Some(crate::raster::SampleType::I16));
        assert_eq!(probe(&path).unwrap().bands, 3);
    }

    #[test]
    fn shape_mismatch_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tif");
        let mut stack = BandStack::new();
        stack.push_empty("short", 3);
        let border = BorderMask::from_values(vec![0; 4]);
        let err = write_stack(&path, &stack, &border, &meta_2x2()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn unwritable_destination_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.tif");
        let mut stack = BandStack::new();
        stack.push_empty("a", 4);
        let border = BorderMask::from_values(vec![0; 4]);
        let err = write_stack(&path, &stack, &border, &meta_2x2()).unwrap_err();
        assert!(matches!(err, Error::WriteError { .. }));
    }

    #[test]
    fn float_bands_read_back_as_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene_refl.tif");
        let planes: Vec<Vec<f32>> = (0..8).map(|b| vec![0.1 * b as f32, 0.2, 0.0, 0.5]).collect();
        write_float_bands(&path, &planes, &meta_2x2(), 0.0).unwrap();

        let (pixels, meta) = read_raster(&path, 8, ReflectanceScale::Unit).unwrap();
        assert_eq!(meta.bands, 8);
        assert_eq!(pixels.shape(), (2, 2));
        assert!((pixels.pixel(0)[3] - 0.3).abs() < 1e-6);
        assert!(read_raster(&path, 4, ReflectanceScale::Unit).is_err());
    }
}
