//! Flat pixel × band reflectance matrix, border detection and reshaping.
//!
//! Pixels are stored row-major (row 0 = first raster row), one matrix row per
//! pixel, so `pixel = row * width + col` and the matrix reshapes back to
//! `(height, width)` without reordering.

use log::warn;
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mask::Mask;

/// Sentinel written into output bands for pixels outside the valid extent.
pub const BORDER_SENTINEL: i16 = -99;

/// Above this value `ReflectanceScale::Detect` assumes scaled-by-1000 input.
pub const DETECT_LIMIT: f64 = 10.0;

const PER_MILLE: f64 = 1000.0;

/// Unit convention of the input raster values.
///
/// Rasters arrive either as plain reflectance or as reflectance × 1000.
/// `Detect` keeps the historical guess (max value > 10 ⇒ per-mille) and logs a
/// warning when it rescales; it is lossy for genuinely bright DN-like data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ReflectanceScale {
    /// Values are reflectance in [0, 1]
    Unit,
    /// Values are reflectance × 1000
    PerMille,
    /// Divide by 1000 when the scene maximum exceeds 10 (lossy guess)
    Detect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelMatrix {
    data: Array2<f64>,
    height: usize,
    width: usize,
}

impl PixelMatrix {
    /// Wrap a `[height * width, bands]` matrix.
    pub fn new(data: Array2<f64>, height: usize, width: usize) -> Result<Self> {
        if data.nrows() != height * width {
            return Err(Error::ShapeMismatch {
                layer: "pixel matrix".into(),
                len: data.nrows(),
                height,
                width,
            });
        }
        Ok(Self { data, height, width })
    }

    pub fn zeros(height: usize, width: usize, bands: usize) -> Self {
        Self {
            data: Array2::zeros((height * width, bands)),
            height,
            width,
        }
    }

    /// Interleave band planes (each row-major, `height * width` long) into a
    /// pixel-major matrix. Plane `i` becomes column `i`.
    pub fn from_band_planes(planes: &[Vec<f64>], height: usize, width: usize) -> Result<Self> {
        let n = height * width;
        let mut data = Array2::<f64>::zeros((n, planes.len()));
        for (b, plane) in planes.iter().enumerate() {
            if plane.len() != n {
                return Err(Error::ShapeMismatch {
                    layer: format!("band {}", b + 1),
                    len: plane.len(),
                    height,
                    width,
                });
            }
            for (p, &v) in plane.iter().enumerate() {
                data[[p, b]] = v;
            }
        }
        Ok(Self { data, height, width })
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.data.nrows()
    }

    pub fn band_count(&self) -> usize {
        self.data.ncols()
    }

    /// `(height, width)` of the source raster.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel(&self, p: usize) -> ArrayView1<'_, f64> {
        self.data.row(p)
    }

    /// Same shape, new values.
    pub fn with_data(&self, data: Array2<f64>) -> Result<Self> {
        if data.dim() != self.data.dim() {
            return Err(Error::DimensionMismatch {
                context: "pixel matrix replacement",
                expected: self.data.len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            height: self.height,
            width: self.width,
        })
    }

    /// Band plane `b` as a row-major vector.
    pub fn band(&self, b: usize) -> Vec<f64> {
        self.data.column(b).to_vec()
    }

    /// Apply the unit convention. Returns true if the values were divided.
    pub fn apply_scale(&mut self, scale: ReflectanceScale) -> bool {
        let divide = match scale {
            ReflectanceScale::Unit => false,
            ReflectanceScale::PerMille => true,
            ReflectanceScale::Detect => {
                let max = self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                if max > DETECT_LIMIT {
                    warn!(
                        "max pixel value {max:.3} exceeds {DETECT_LIMIT}; \
                         assuming per-mille reflectance and dividing by {PER_MILLE}"
                    );
                    true
                } else {
                    false
                }
            }
        };
        if divide {
            self.data.mapv_inplace(|v| v / PER_MILLE);
        }
        divide
    }

    /// Copy with every pixel outside `mask` set to zero.
    pub fn masked(&self, mask: &Mask) -> Result<Self> {
        if mask.len() != self.pixel_count() {
            return Err(Error::DimensionMismatch {
                context: "pixel mask",
                expected: self.pixel_count(),
                actual: mask.len(),
            });
        }
        let mut data = self.data.clone();
        for (p, mut row) in data.axis_iter_mut(Axis(0)).enumerate() {
            if !mask.is_set(p) {
                row.fill(0.0);
            }
        }
        Ok(Self {
            data,
            height: self.height,
            width: self.width,
        })
    }

    /// Per-pixel albedo: mean value over all bands.
    pub fn albedo(&self) -> Vec<f64> {
        let bands = self.band_count().max(1) as f64;
        self.data.rows().into_iter().map(|r| r.sum() / bands).collect()
    }
}

/// 0 for pixels carrying data, −99 for pixels whose bands are all zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorderMask(Vec<i16>);

impl BorderMask {
    pub fn from_pixels(pixels: &PixelMatrix) -> Self {
        Self(
            pixels
                .data()
                .rows()
                .into_iter()
                .map(|r| if r.iter().all(|&v| v == 0.0) { BORDER_SENTINEL } else { 0 })
                .collect(),
        )
    }

    /// Build from explicit values (0 or −99).
    pub fn from_values(values: Vec<i16>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[i16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_border(&self, pixel: usize) -> bool {
        self.0[pixel] == BORDER_SENTINEL
    }

    pub fn border_count(&self) -> usize {
        self.0.iter().filter(|&&v| v == BORDER_SENTINEL).count()
    }

    /// Mask of pixels that carry data.
    pub fn interior(&self) -> Mask {
        Mask::from_fn(self.len(), |p| !self.is_border(p))
    }
}

/// Flatten a `(height, width)` grid row-major.
pub fn flatten<T: Clone>(grid: &Array2<T>) -> Vec<T> {
    grid.iter().cloned().collect()
}

/// Reshape a row-major vector to `(height, width)`.
pub fn reshape<T: Clone>(
    values: &[T],
    height: usize,
    width: usize,
    layer: &str,
) -> Result<Array2<T>> {
    Array2::from_shape_vec((height, width), values.to_vec()).map_err(|_| Error::ShapeMismatch {
        layer: layer.to_string(),
        len: values.len(),
        height,
        width,
    })
}
