//! Reconstruction and per-pixel RMS residual.

use ndarray::{Array1, Array2, Axis};

use super::Abundances;
use crate::error::{Error, Result};
use crate::pixels::PixelMatrix;
use crate::spectrum::{spectra_matrix, Endmember};

/// `[P, B]` modeled spectra: un-normalized abundances times endmember spectra.
pub fn modeled(abundances: &Abundances, endmembers: &[Endmember]) -> Result<Array2<f64>> {
    if abundances.endmember_count() != endmembers.len() {
        return Err(Error::DimensionMismatch {
            context: "abundance columns vs endmembers",
            expected: endmembers.len(),
            actual: abundances.endmember_count(),
        });
    }
    let bands = endmembers.first().map_or(0, Endmember::bands);
    let spectra = spectra_matrix(endmembers, bands)?;
    Ok(abundances.un_normalized().dot(&spectra))
}

/// Root-mean-square misfit between each observed and modeled pixel.
pub fn rms(
    abundances: &Abundances,
    endmembers: &[Endmember],
    pixels: &PixelMatrix,
) -> Result<Vec<f64>> {
    if abundances.pixel_count() != pixels.pixel_count() {
        return Err(Error::DimensionMismatch {
            context: "abundance rows vs pixels",
            expected: pixels.pixel_count(),
            actual: abundances.pixel_count(),
        });
    }
    let model = modeled(abundances, endmembers)?;
    if model.ncols() != pixels.band_count() {
        return Err(Error::DimensionMismatch {
            context: "endmember bands vs pixel bands",
            expected: pixels.band_count(),
            actual: model.ncols(),
        });
    }
    let diff = pixels.data() - &model;
    let bands = pixels.band_count().max(1) as f64;
    let sq: Array1<f64> = diff.mapv(|d| d * d).sum_axis(Axis(1));
    Ok(sq.iter().map(|s| (s / bands).sqrt()).collect())
}

/// `[P, B]` share of the signal explained by endmember `index` alone.
pub fn contribution(
    abundances: &Abundances,
    index: usize,
    endmember: &Endmember,
) -> Result<Array2<f64>> {
    if index >= abundances.endmember_count() {
        return Err(Error::DimensionMismatch {
            context: "endmember index",
            expected: abundances.endmember_count(),
            actual: index,
        });
    }
    let weights = abundances.values().column(index).mapv(|a| a * abundances.norm_const());
    let spectrum = Array1::from(endmember.spectrum.clone());
    let p = weights.len();
    let b = spectrum.len();
    Ok(Array2::from_shape_fn((p, b), |(i, j)| weights[i] * spectrum[j]))
}
