//! Band extraction from multi-band GeoTIFFs.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::debug;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use super::{read_nodata, GeoTags, RasterMeta, SampleType};
use crate::error::{Error, Result};
use crate::pixels::{PixelMatrix, ReflectanceScale};

/// Read a raster that must carry exactly `expected_bands` bands into a
/// pixel-major matrix and apply the unit convention.
pub fn read_raster(
    path: impl AsRef<Path>,
    expected_bands: usize,
    scale: ReflectanceScale,
) -> Result<(PixelMatrix, RasterMeta)> {
    let path = path.as_ref();
    let (planes, meta) = read_planes(path)?;
    if planes.len() != expected_bands {
        return Err(Error::DimensionMismatch {
            context: "raster band count",
            expected: expected_bands,
            actual: planes.len(),
        });
    }
    let mut pixels = PixelMatrix::from_band_planes(&planes, meta.height, meta.width)?;
    if pixels.apply_scale(scale) {
        debug!("{}: rescaled per-mille reflectance", path.display());
    }
    Ok((pixels, meta))
}

/// Every band of the raster as a row-major plane of `f64`.
pub fn read_planes(path: impl AsRef<Path>) -> Result<(Vec<Vec<f64>>, RasterMeta)> {
    let path = path.as_ref();
    let mut decoder = open(path)?;
    let mut meta = header(path, &mut decoder)?;
    let n = meta.pixel_count();

    let mut planes = Vec::new();
    loop {
        let (w, h) = decoder.dimensions().map_err(|e| Error::raster(path, e))?;
        // Reduced-resolution overviews share the file; only full-size pages are bands.
        if (w as usize, h as usize) == (meta.width, meta.height) {
            let (values, sample_type) = decode_page(path, &mut decoder)?;
            meta.sample_type.get_or_insert(sample_type);
            if n == 0 || values.len() % n != 0 {
                return Err(Error::UnsupportedRaster {
                    path: path.to_path_buf(),
                    reason: format!("{} samples do not fill a {}x{} page", values.len(), w, h),
                });
            }
            let samples = values.len() / n;
            if samples == 1 {
                planes.push(values);
            } else {
                planes.extend(deinterleave(&values, samples));
            }
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(|e| Error::raster(path, e))?;
    }

    meta.bands = planes.len();
    debug!(
        "{}: {}x{} with {} band(s)",
        path.display(),
        meta.width,
        meta.height,
        meta.bands
    );
    Ok((planes, meta))
}

/// Header-only inspection: shape, band count and georeferencing.
pub fn probe(path: impl AsRef<Path>) -> Result<RasterMeta> {
    let path = path.as_ref();
    let mut decoder = open(path)?;
    let mut meta = header(path, &mut decoder)?;
    let mut bands = 0;
    loop {
        let (w, h) = decoder.dimensions().map_err(|e| Error::raster(path, e))?;
        if (w as usize, h as usize) == (meta.width, meta.height) {
            let samples = decoder
                .find_tag(Tag::SamplesPerPixel)
                .map_err(|e| Error::raster(path, e))?
                .map(|v| v.into_u32())
                .transpose()
                .map_err(|e| Error::raster(path, e))?
                .unwrap_or(1);
            bands += samples as usize;
        }
        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(|e| Error::raster(path, e))?;
    }
    meta.bands = bands;
    Ok(meta)
}

fn open(path: &Path) -> Result<Decoder<BufReader<File>>> {
    if !path.is_file() {
        return Err(Error::MissingResource {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| Error::raster(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

/// Shape, no-data and georeferencing from the first directory.
fn header<R: Read + Seek>(path: &Path, decoder: &mut Decoder<R>) -> Result<RasterMeta> {
    let (w, h) = decoder.dimensions().map_err(|e| Error::raster(path, e))?;
    let geo = GeoTags::read_from(decoder).map_err(|e| Error::raster(path, e))?;
    let nodata = read_nodata(decoder).map_err(|e| Error::raster(path, e))?;
    Ok(RasterMeta {
        width: w as usize,
        height: h as usize,
        bands: 0,
        sample_type: None,
        nodata,
        geo,
    })
}

fn decode_page<R: Read + Seek>(
    path: &Path,
    decoder: &mut Decoder<R>,
) -> Result<(Vec<f64>, SampleType)> {
    let image = decoder.read_image().map_err(|e| Error::raster(path, e))?;
    let out = match image {
        DecodingResult::U8(v) => (v.into_iter().map(f64::from).collect(), SampleType::U8),
        DecodingResult::U16(v) => (v.into_iter().map(f64::from).collect(), SampleType::U16),
        DecodingResult::U32(v) => (v.into_iter().map(f64::from).collect(), SampleType::U32),
        DecodingResult::U64(v) => (v.into_iter().map(|x| x as f64).collect(), SampleType::U64),
        DecodingResult::I8(v) => (v.into_iter().map(f64::from).collect(), SampleType::I8),
        DecodingResult::I16(v) => (v.into_iter().map(f64::from).collect(), SampleType::I16),
        DecodingResult::I32(v) => (v.into_iter().map(f64::from).collect(), SampleType::I32),
        DecodingResult::I64(v) => (v.into_iter().map(|x| x as f64).collect(), SampleType::I64),
        DecodingResult::F32(v) => (v.into_iter().map(f64::from).collect(), SampleType::F32),
        DecodingResult::F64(v) => (v, SampleType::F64),
        #[allow(unreachable_patterns)]
        _ => {
            return Err(Error::UnsupportedRaster {
                path: path.to_path_buf(),
                reason: "unsupported sample type".into(),
            })
        }
    };
    Ok(out)
}

/// Split pixel-interleaved samples into one plane per sample.
fn deinterleave(values: &[f64], samples: usize) -> Vec<Vec<f64>> {
    let n = values.len() / samples;
    (0..samples)
        .map(|s| (0..n).map(|p| values[p * samples + s]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_splits_chunky_samples() {
        let v = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        assert_eq!(deinterleave(&v, 2), vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]]);
    }

    #[test]
    fn missing_raster_is_missing_resource() {
        let err = read_raster("/no/such/scene.tif", 8, ReflectanceScale::Unit).unwrap_err();
        assert!(matches!(err, Error::MissingResource { .. }));
    }

    #[test]
    fn garbage_file_is_raster_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tif");
        std::fs::write(&path, b"this is not a tiff").unwrap();
        assert!(matches!(probe(&path), Err(Error::Raster { .. })));
    }
}
