//! Endmember spectra for the WorldView-2/3 eight-band sensors.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of multispectral bands (coastal, blue, green, yellow, red,
/// red-edge, NIR1, NIR2).
pub const BAND_COUNT: usize = 8;

// ── Reference spectra (reflectance) ──────────────────────────────────────────

pub const ATMOSPHERE: [f64; BAND_COUNT] =
    [0.229667, 0.171667, 0.094333, 0.055667, 0.034, 0.019667, 0.001667, 0.0];
pub const BLUE_ICE: [f64; BAND_COUNT] =
    [0.310994, 0.328909, 0.302449, 0.234954, 0.197393, 0.155512, 0.122738, 0.107701];
pub const SNOW: [f64; BAND_COUNT] =
    [0.7298, 0.74388, 0.758755, 0.74022, 0.739445, 0.71887, 0.67605, 0.615885];
pub const WATER: [f64; BAND_COUNT] =
    [0.0806, 0.0855, 0.0945, 0.0969, 0.0959, 0.0889, 0.0837, 0.0812];

/// Mg-rich dolerite.
pub const MORE_MAFIC_DOLERITE: [f64; BAND_COUNT] =
    [0.141365, 0.162614, 0.188622, 0.203393, 0.210742, 0.216176, 0.182945, 0.163316];
/// Mg-poor dolerite.
pub const LESS_MAFIC_DOLERITE: [f64; BAND_COUNT] =
    [0.082166, 0.097734, 0.128021, 0.163402, 0.177911, 0.187761, 0.177382, 0.16477];
/// Granite / metamorphic basement.
pub const GRANITE: [f64; BAND_COUNT] =
    [0.161972, 0.184228, 0.207389, 0.218254, 0.218669, 0.217567, 0.216672, 0.213827];
/// Sandstone / mudstone.
pub const SANDSTONE: [f64; BAND_COUNT] =
    [0.178015, 0.208722, 0.261726, 0.318685, 0.346399, 0.377037, 0.413383, 0.43422];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndmemberKind {
    /// A measured or library spectrum.
    Real,
    /// All-zero slot filler; never receives abundance.
    Placeholder,
}

/// A named reference spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endmember {
    pub name: String,
    pub spectrum: Vec<f64>,
    pub kind: EndmemberKind,
}

impl Endmember {
    pub fn new(name: impl Into<String>, spectrum: impl Into<Vec<f64>>) -> Self {
        Self {
            name: name.into(),
            spectrum: spectrum.into(),
            kind: EndmemberKind::Real,
        }
    }

    /// An all-zero endmember of `bands` values.
    pub fn placeholder(name: impl Into<String>, bands: usize) -> Self {
        Self {
            name: name.into(),
            spectrum: vec![0.0; bands],
            kind: EndmemberKind::Placeholder,
        }
    }

    pub fn bands(&self) -> usize {
        self.spectrum.len()
    }

    /// True for explicit placeholders and for real spectra that happen to be
    /// all zero; both are degenerate columns for the solver.
    pub fn is_degenerate(&self) -> bool {
        self.kind == EndmemberKind::Placeholder || self.spectrum.iter().all(|&v| v == 0.0)
    }
}

/// Stack endmember spectra into an `[E, B]` matrix, checking that every
/// spectrum has `bands` values.
pub fn spectra_matrix(endmembers: &[Endmember], bands: usize) -> Result<Array2<f64>> {
    let mut out = Array2::<f64>::zeros((endmembers.len(), bands));
    for (i, em) in endmembers.iter().enumerate() {
        if em.bands() != bands {
            return Err(Error::DimensionMismatch {
                context: "endmember band count",
                expected: bands,
                actual: em.bands(),
            });
        }
        for (b, &v) in em.spectrum.iter().enumerate() {
            out[[i, b]] = v;
        }
    }
    Ok(out)
}
