//! Coarse three-way split on summed reflectance.
//!
//! Bright pixels (sum ≥ 3 over eight bands) are snow or ice, dark ones
//! (sum ≤ 1) shadow or open water, everything between is exposed geology.

use crate::pixels::{PixelMatrix, BORDER_SENTINEL};

const SNOW_ICE_MIN_SUM: f64 = 3.0;
const SHADOW_WATER_MAX_SUM: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceClass {
    SnowIce,
    Geology,
    ShadowWater,
    NoData,
}

impl SurfaceClass {
    pub fn from_sum(sum: f64) -> Self {
        if sum >= SNOW_ICE_MIN_SUM {
            SurfaceClass::SnowIce
        } else if sum <= SHADOW_WATER_MAX_SUM {
            SurfaceClass::ShadowWater
        } else {
            SurfaceClass::Geology
        }
    }

    /// Raster code written for this class.
    pub fn code(&self) -> i16 {
        match self {
            SurfaceClass::SnowIce => 1,
            SurfaceClass::Geology => 2,
            SurfaceClass::ShadowWater => 3,
            SurfaceClass::NoData => BORDER_SENTINEL,
        }
    }
}

/// Per-pixel band sum and class.
#[derive(Debug, Clone, PartialEq)]
pub struct BandSumResult {
    pub sums: Vec<f64>,
    pub classes: Vec<SurfaceClass>,
}

impl BandSumResult {
    pub fn codes(&self) -> Vec<i16> {
        self.classes.iter().map(SurfaceClass::code).collect()
    }
}

pub fn classify(pixels: &PixelMatrix) -> BandSumResult {
    let (sums, classes): (Vec<f64>, Vec<SurfaceClass>) = pixels
        .data()
        .rows()
        .into_iter()
        .map(|row| {
            if row.iter().all(|&v| v == 0.0) {
                (0.0, SurfaceClass::NoData)
            } else {
                let s = row.sum();
                (s, SurfaceClass::from_sum(s))
            }
        })
        .unzip();
    BandSumResult { sums, classes }
}
