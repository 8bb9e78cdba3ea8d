//! Per-pixel non-negative spectral unmixing.
//!
//! Every pixel is solved independently, so the matrix is cut into chunks of
//! `chunk_pixels` rows; with the `threading` feature the chunks run on the
//! rayon pool. Chunking never changes the result.

pub mod nnls;
pub mod rms;

use std::time::Instant;

use log::debug;
use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Error, Result};
use crate::pixels::PixelMatrix;
use crate::spectrum::{Endmember, EndmemberKind};
use nnls::NnlsSystem;

pub use rms::{contribution, modeled, rms};

/// Default number of pixels solved per chunk.
pub const DEFAULT_CHUNK_PIXELS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnmixOptions {
    /// Divide all abundances by the largest per-pixel row sum.
    pub normalize: bool,
    pub chunk_pixels: usize,
}

impl Default for UnmixOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            chunk_pixels: DEFAULT_CHUNK_PIXELS,
        }
    }
}

/// `[P, E]` abundance matrix plus the constant it was divided by.
///
/// `norm_const` is 1 for un-normalized output and for scenes where every
/// row sum is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Abundances {
    values: Array2<f64>,
    norm_const: f64,
}

impl Abundances {
    pub fn new(values: Array2<f64>, norm_const: f64) -> Self {
        Self { values, norm_const }
    }

    /// Wrap raw solver output, normalizing if requested.
    pub fn from_raw(mut values: Array2<f64>, normalize: bool) -> Self {
        if !normalize {
            return Self::new(values, 1.0);
        }
        let max_sum = values
            .rows()
            .into_iter()
            .map(|r| r.sum())
            .fold(0.0, f64::max);
        let norm_const = if max_sum > 0.0 { max_sum } else { 1.0 };
        values.mapv_inplace(|v| v / norm_const);
        Self::new(values, norm_const)
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn norm_const(&self) -> f64 {
        self.norm_const
    }

    pub fn pixel_count(&self) -> usize {
        self.values.nrows()
    }

    pub fn endmember_count(&self) -> usize {
        self.values.ncols()
    }

    /// Abundances multiplied back by the normalization constant.
    pub fn un_normalized(&self) -> Array2<f64> {
        &self.values * self.norm_const
    }
}

/// A prepared endmember set.
#[derive(Debug, Clone)]
pub struct Unmixer {
    endmembers: Vec<Endmember>,
    system: NnlsSystem,
    options: UnmixOptions,
}

impl Unmixer {
    pub fn new(endmembers: &[Endmember], options: UnmixOptions) -> Result<Self> {
        let Some(first) = endmembers.first() else {
            return Err(Error::DimensionMismatch {
                context: "endmember count",
                expected: 1,
                actual: 0,
            });
        };
        let bands = first.bands();
        let mut spectra = Vec::with_capacity(endmembers.len());
        for em in endmembers {
            if em.bands() != bands {
                return Err(Error::DimensionMismatch {
                    context: "endmember band count",
                    expected: bands,
                    actual: em.bands(),
                });
            }
            spectra.push(match em.kind {
                EndmemberKind::Placeholder => vec![0.0; bands],
                EndmemberKind::Real => em.spectrum.clone(),
            });
        }
        Ok(Self {
            endmembers: endmembers.to_vec(),
            system: NnlsSystem::new(spectra),
            options,
        })
    }

    pub fn bands(&self) -> usize {
        self.endmembers[0].bands()
    }

    pub fn unmix(&self, pixels: &PixelMatrix) -> Result<Abundances> {
        if pixels.band_count() != self.bands() {
            return Err(Error::DimensionMismatch {
                context: "pixel band count",
                expected: self.bands(),
                actual: pixels.band_count(),
            });
        }
        let start = Instant::now();
        let chunk = self.options.chunk_pixels.max(1);
        let chunks: Vec<ArrayView2<'_, f64>> =
            pixels.data().axis_chunks_iter(Axis(0), chunk).collect();

        #[cfg(feature = "threading")]
        let solved: Vec<Vec<f64>> = {
            use rayon::prelude::*;
            chunks.par_iter().map(|c| self.solve_chunk(c)).collect()
        };
        #[cfg(not(feature = "threading"))]
        let solved: Vec<Vec<f64>> = chunks.iter().map(|c| self.solve_chunk(c)).collect();

        let e = self.endmembers.len();
        let flat: Vec<f64> = solved.into_iter().flatten().collect();
        let solved_len = flat.len();
        let values = Array2::from_shape_vec((pixels.pixel_count(), e), flat).map_err(|_| {
            Error::DimensionMismatch {
                context: "abundance matrix",
                expected: pixels.pixel_count() * e,
                actual: solved_len,
            }
        })?;

        debug!(
            "unmixed {} pixels against {} endmembers in {:.1} ms",
            pixels.pixel_count(),
            e,
            start.elapsed().as_secs_f64() * 1e3
        );
        Ok(Abundances::from_raw(values, self.options.normalize))
    }

    /// Row-major `[rows, E]` coefficients for one chunk.
    fn solve_chunk(&self, chunk: &ArrayView2<'_, f64>) -> Vec<f64> {
        let mut out = Vec::with_capacity(chunk.nrows() * self.endmembers.len());
        let mut pixel = vec![0.0; chunk.ncols()];
        for row in chunk.rows() {
            for (dst, &v) in pixel.iter_mut().zip(row.iter()) {
                *dst = v;
            }
            out.extend(self.system.solve(&pixel));
        }
        out
    }
}

/// Unmix `pixels` against `endmembers` in one call.
pub fn unmix(
    pixels: &PixelMatrix,
    endmembers: &[Endmember],
    options: UnmixOptions,
) -> Result<Abundances> {
    Unmixer::new(endmembers, options)?.unmix(pixels)
}
