//! GeoTIFF input and output.
//!
//! Bands are accepted either as samples of one image directory or as one
//! directory per band. Outputs are always written one directory per band.
//! Georeferencing tags are carried through untouched; nothing here interprets
//! the projection.

pub mod read;
pub mod write;

use std::fs;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use tiff::decoder::Decoder;
use tiff::encoder::DirectoryEncoder;
use tiff::encoder::TiffKind;
use tiff::tags::Tag;
use tiff::TiffResult;

use crate::error::{Error, Result};

pub use read::{probe, read_planes, read_raster};
pub use write::{write_float_bands, write_stack};

// ── GeoTIFF tag numbers ───────────────────────────────────────────────────────

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Storage type of the source samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

/// Georeferencing tags copied verbatim from the source raster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoTags {
    pub pixel_scale: Option<Vec<f64>>,
    pub tiepoint: Option<Vec<f64>>,
    pub transformation: Option<Vec<f64>>,
    pub key_directory: Option<Vec<u16>>,
    pub double_params: Option<Vec<f64>>,
    pub ascii_params: Option<String>,
}

impl GeoTags {
    pub fn is_empty(&self) -> bool {
        *self == GeoTags::default()
    }

    pub(crate) fn read_from<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Self> {
        let f64s = |d: &mut Decoder<R>, code| -> TiffResult<Option<Vec<f64>>> {
            d.find_tag(tag(code))?.map(|v| v.into_f64_vec()).transpose()
        };
        let pixel_scale = f64s(decoder, MODEL_PIXEL_SCALE)?;
        let tiepoint = f64s(decoder, MODEL_TIEPOINT)?;
        let transformation = f64s(decoder, MODEL_TRANSFORMATION)?;
        let double_params = f64s(decoder, GEO_DOUBLE_PARAMS)?;
        let key_directory = decoder
            .find_tag(tag(GEO_KEY_DIRECTORY))?
            .map(|v| v.into_u32_vec())
            .transpose()?
            .map(|keys| keys.into_iter().map(|k| k as u16).collect());
        let ascii_params = decoder
            .find_tag(tag(GEO_ASCII_PARAMS))?
            .map(|v| v.into_string())
            .transpose()?;
        Ok(Self {
            pixel_scale,
            tiepoint,
            transformation,
            key_directory,
            double_params,
            ascii_params,
        })
    }

    pub(crate) fn write_to<W: Write + Seek, K: TiffKind>(
        &self,
        dir: &mut DirectoryEncoder<'_, W, K>,
    ) -> TiffResult<()> {
        if let Some(v) = &self.pixel_scale {
            dir.write_tag(tag(MODEL_PIXEL_SCALE), &v[..])?;
        }
        if let Some(v) = &self.tiepoint {
            dir.write_tag(tag(MODEL_TIEPOINT), &v[..])?;
        }
        if let Some(v) = &self.transformation {
            dir.write_tag(tag(MODEL_TRANSFORMATION), &v[..])?;
        }
        if let Some(v) = &self.key_directory {
            dir.write_tag(tag(GEO_KEY_DIRECTORY), &v[..])?;
        }
        if let Some(v) = &self.double_params {
            dir.write_tag(tag(GEO_DOUBLE_PARAMS), &v[..])?;
        }
        if let Some(v) = &self.ascii_params {
            dir.write_tag(tag(GEO_ASCII_PARAMS), v.as_str())?;
        }
        Ok(())
    }
}

/// Everything about the source raster except its pixel values.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub sample_type: Option<SampleType>,
    pub nodata: Option<f64>,
    pub geo: GeoTags,
}

impl RasterMeta {
    /// Metadata for a raster built in memory, without georeferencing.
    pub fn new(width: usize, height: usize, bands: usize) -> Self {
        Self {
            width,
            height,
            bands,
            sample_type: None,
            nodata: None,
            geo: GeoTags::default(),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

// ── Scene discovery ───────────────────────────────────────────────────────────

pub const ENDMEMBER_SUFFIX: &str = "_endmember";
pub const RADIANCE_SUFFIX: &str = "_rad";
pub const ATMCORR_SUFFIX: &str = "_rad_atmcorr";
pub const REFLECTANCE_SUFFIX: &str = "_refl";
pub const CLASS_SUFFIX: &str = "_class";

/// Suffixes of files this workspace writes; never treated as inputs.
const PRODUCT_SUFFIXES: [&str; 4] =
    [ENDMEMBER_SUFFIX, RADIANCE_SUFFIX, ATMCORR_SUFFIX, CLASS_SUFFIX];

/// `dir/scene.tif` → `dir/scene<suffix>.tif`
pub fn derived_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    input.with_file_name(format!("{stem}{suffix}.tif"))
}

/// True for `.tif`/`.tiff` names that are not one of our own products.
pub fn is_scene_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let Some(stem) = lower.strip_suffix(".tif").or_else(|| lower.strip_suffix(".tiff")) else {
        return false;
    };
    !PRODUCT_SUFFIXES.iter().any(|s| stem.ends_with(s))
}

/// Scene rasters directly inside `dir`, sorted by path.
pub fn discover(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::MissingResource {
            path: dir.to_path_buf(),
        });
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_scene = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_scene_name);
        if path.is_file() && is_scene {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

pub(crate) fn read_nodata<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Option<f64>> {
    Ok(decoder
        .find_tag(tag(GDAL_NODATA))?
        .map(|v| v.into_string())
        .transpose()?
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok()))
}

pub(crate) fn write_nodata<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    nodata: f64,
) -> TiffResult<()> {
    dir.write_tag(tag(GDAL_NODATA), nodata.to_string().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn products_are_not_scenes() {
        assert!(is_scene_name("WV02_20161107_refl.tif"));
        assert!(is_scene_name("scene.TIFF"));
        assert!(!is_scene_name("scene_endmember.tif"));
        assert!(!is_scene_name("scene_rad.tif"));
        assert!(!is_scene_name("scene_rad_atmcorr.tif"));
        assert!(!is_scene_name("scene_class.tif"));
        assert!(!is_scene_name("scene.xml"));
    }

    #[test]
    fn derived_path_keeps_directory() {
        let out = derived_path(Path::new("/data/wv/scene_refl.tif"), ENDMEMBER_SUFFIX);
        assert_eq!(out, PathBuf::from("/data/wv/scene_refl_endmember.tif"));
    }

    #[test]
    fn discover_lists_sorted_scenes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.tif", "a.tif", "a_endmember.tif", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = discover(dir.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.tif", "b.tif"]);
        assert!(matches!(discover(dir.path().join("nope")), Err(Error::MissingResource { .. })));
    }
}
