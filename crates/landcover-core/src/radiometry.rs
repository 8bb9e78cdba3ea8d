//! DN → top-of-atmosphere radiance → atmospherically corrected radiance →
//! reflectance for WorldView-2/3.
//!
//! Per-band absolute calibration (gain, offset) and band-averaged solar
//! irradiance come from the published sensor tables. Scene-specific factors
//! (abscal, effective bandwidth, sun elevation, date) are read from the image
//! metadata and supplied as [`SceneParams`].
//!
//! Atmospheric correction is a dark-object subtraction: radiance sampled over
//! dark targets is regressed band by band against NIR2, and each intercept is
//! the path radiance removed from that band. NIR2 is left as is.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pixels::PixelMatrix;
use crate::spectrum::BAND_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sensor {
    #[serde(rename = "WV02")]
    Wv02,
    #[serde(rename = "WV03")]
    Wv03,
}

// ── Sensor tables (band order C, B, G, Y, R, RE, N, N2) ───────────────────────

const WV02_GAIN: [f64; BAND_COUNT] = [1.151, 0.988, 0.936, 0.949, 0.952, 0.974, 0.961, 1.002];
const WV02_OFFSET: [f64; BAND_COUNT] =
    [-7.478, -5.736, -3.546, -3.564, -2.512, -4.120, -3.300, -2.891];
const WV02_ESUN: [f64; BAND_COUNT] = [
    1758.2229, 1974.2416, 1856.4104, 1738.4791, 1559.4555, 1342.0695, 1069.7302, 861.2866,
];

const WV03_GAIN: [f64; BAND_COUNT] = [0.905, 0.940, 0.938, 0.962, 0.964, 1.000, 0.961, 0.978];
const WV03_OFFSET: [f64; BAND_COUNT] =
    [-8.604, -5.809, -4.996, -3.649, -3.021, -4.521, -5.522, -2.992];
const WV03_ESUN: [f64; BAND_COUNT] = [
    1803.9109, 1982.4485, 1857.1232, 1746.5947, 1556.9730, 1340.6822, 1072.5267, 871.1058,
];

impl Sensor {
    pub fn gain(&self) -> &'static [f64; BAND_COUNT] {
        match self {
            Sensor::Wv02 => &WV02_GAIN,
            Sensor::Wv03 => &WV03_GAIN,
        }
    }

    pub fn offset(&self) -> &'static [f64; BAND_COUNT] {
        match self {
            Sensor::Wv02 => &WV02_OFFSET,
            Sensor::Wv03 => &WV03_OFFSET,
        }
    }

    /// Solar exo-atmospheric irradiance, W·m⁻²·µm⁻¹.
    pub fn esun(&self) -> &'static [f64; BAND_COUNT] {
        match self {
            Sensor::Wv02 => &WV02_ESUN,
            Sensor::Wv03 => &WV03_ESUN,
        }
    }

    /// Radiance of one band from a raw DN.
    pub fn radiance(
        &self,
        dn: f64,
        band: usize,
        abscal_factor: f64,
        effective_bandwidth: f64,
    ) -> f64 {
        self.gain()[band] * dn * (abscal_factor / effective_bandwidth) + self.offset()[band]
    }

    /// Top-of-atmosphere reflectance of one band.
    pub fn reflectance(
        &self,
        radiance: f64,
        band: usize,
        earth_sun_au: f64,
        sun_elevation_deg: f64,
    ) -> f64 {
        let incidence = sun_elevation_deg.to_radians().sin();
        radiance * PI * earth_sun_au * earth_sun_au / (self.esun()[band] * incidence)
    }
}

/// Earth–Sun distance in AU for a day of year (1 = 1 January).
pub fn earth_sun_distance(day_of_year: u32) -> f64 {
    1.0 - 0.01672 * (0.9856 * (f64::from(day_of_year) - 4.0)).to_radians().cos()
}

// ── Atmospheric correction ───────────────────────────────────────────────────

/// Bands that receive a correction (all but NIR2).
pub const CORRECTED_BANDS: usize = BAND_COUNT - 1;

/// Mean squared residual below which a band fit passes.
pub const FIT_PASS_LIMIT: f64 = 3.0;

// A failing band only counts against the sample set above this residual.
const HARD_FAIL_LIMIT: f64 = 5.0;
const MAX_HARD_FAILS: usize = 4;

// Samples at or below this value do not contribute to the residual.
const SAMPLE_FLOOR: f64 = 1e-7;

/// Least-squares line of one band against NIR2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandFit {
    pub slope: f64,
    pub intercept: f64,
    /// Squared residual summed over positive samples, divided by all samples.
    pub misfit: f64,
    pub passed: bool,
}

/// Regression of one dark-target sample set.
#[derive(Debug, Clone, PartialEq)]
pub struct DarkTargetFit {
    /// One fit per corrected band.
    pub bands: Vec<BandFit>,
    pub passed: bool,
}

impl DarkTargetFit {
    /// Fit `samples[band][i]` (eight bands, equal lengths, at least two
    /// samples).
    pub fn fit(samples: &[Vec<f64>]) -> Result<Self> {
        if samples.len() != BAND_COUNT {
            return Err(Error::DimensionMismatch {
                context: "dark-target band count",
                expected: BAND_COUNT,
                actual: samples.len(),
            });
        }
        let nir2 = &samples[BAND_COUNT - 1];
        if nir2.len() < 2 {
            return Err(Error::DimensionMismatch {
                context: "dark-target sample count",
                expected: 2,
                actual: nir2.len(),
            });
        }
        let mut bands = Vec::with_capacity(CORRECTED_BANDS);
        for band in &samples[..CORRECTED_BANDS] {
            if band.len() != nir2.len() {
                return Err(Error::DimensionMismatch {
                    context: "dark-target samples per band",
                    expected: nir2.len(),
                    actual: band.len(),
                });
            }
            bands.push(fit_line(nir2, band));
        }
        let hard_fails = bands
            .iter()
            .filter(|f| !f.passed && f.misfit > HARD_FAIL_LIMIT)
            .count();
        Ok(Self {
            bands,
            passed: hard_fails < MAX_HARD_FAILS,
        })
    }

    /// Per-band path radiance (the intercepts).
    pub fn corrections(&self) -> Vec<f64> {
        self.bands.iter().map(|f| f.intercept).collect()
    }
}

fn fit_line(x: &[f64], y: &[f64]) -> BandFit {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let sxx: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mean_x) * (b - mean_y)).sum();
    // Constant NIR2 carries no slope information.
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let misfit = x
        .iter()
        .zip(y)
        .filter(|&(_, &b)| b > SAMPLE_FLOOR)
        .map(|(a, b)| (b - (slope * a + intercept)).powi(2))
        .sum::<f64>()
        / n;
    BandFit {
        slope,
        intercept,
        misfit,
        passed: misfit < FIT_PASS_LIMIT,
    }
}

/// Band rows of a dark-target export: the last eight non-empty lines, each a
/// label column followed by whitespace-separated samples.
pub fn parse_dark_targets(text: &str) -> Result<Vec<Vec<f64>>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();
    if lines.len() < BAND_COUNT {
        return Err(Error::MalformedSamples {
            line: lines.len(),
            reason: format!("expected {BAND_COUNT} band rows, found {}", lines.len()),
        });
    }
    lines[lines.len() - BAND_COUNT..]
        .iter()
        .map(|&(i, line)| {
            line.split_whitespace()
                .skip(1)
                .map(|field| {
                    field.parse::<f64>().map_err(|_| Error::MalformedSamples {
                        line: i + 1,
                        reason: format!("'{field}' is not a number"),
                    })
                })
                .collect()
        })
        .collect()
}

/// Per-band mean of several sample sets' corrections.
pub fn mean_corrections(fits: &[DarkTargetFit]) -> Result<Vec<f64>> {
    if fits.is_empty() {
        return Err(Error::DimensionMismatch {
            context: "dark-target sample sets",
            expected: 1,
            actual: 0,
        });
    }
    let mut sums = vec![0.0; CORRECTED_BANDS];
    for fit in fits {
        for (s, c) in sums.iter_mut().zip(fit.corrections()) {
            *s += c;
        }
    }
    Ok(sums.into_iter().map(|s| s / fits.len() as f64).collect())
}

/// Subtract per-band path radiance from bands 1–7. No-data pixels stay zero.
pub fn correct_atmosphere(radiance: &PixelMatrix, corrections: &[f64]) -> Result<PixelMatrix> {
    if corrections.len() != CORRECTED_BANDS {
        return Err(Error::DimensionMismatch {
            context: "atmospheric correction count",
            expected: CORRECTED_BANDS,
            actual: corrections.len(),
        });
    }
    map_bands(radiance, |band, v| v - corrections.get(band).copied().unwrap_or(0.0))
}

/// Acquisition parameters for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneParams {
    pub sensor: Sensor,
    /// Mean sun elevation in degrees.
    pub sun_elevation_deg: f64,
    pub day_of_year: u32,
    /// Overrides the distance derived from `day_of_year`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earth_sun_au: Option<f64>,
    pub abscal_factor: Vec<f64>,
    pub effective_bandwidth: Vec<f64>,
    /// Path radiance of bands 1–7, when known ahead of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atmospheric_correction: Option<Vec<f64>>,
}

impl SceneParams {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingResource {
                path: path.to_path_buf(),
            });
        }
        let params: Self = serde_json::from_str(&fs::read_to_string(path)?)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        for (context, len) in [
            ("abscal factor count", self.abscal_factor.len()),
            ("effective bandwidth count", self.effective_bandwidth.len()),
        ] {
            if len != BAND_COUNT {
                return Err(Error::DimensionMismatch {
                    context,
                    expected: BAND_COUNT,
                    actual: len,
                });
            }
        }
        if let Some(c) = &self.atmospheric_correction {
            if c.len() != CORRECTED_BANDS {
                return Err(Error::DimensionMismatch {
                    context: "atmospheric correction count",
                    expected: CORRECTED_BANDS,
                    actual: c.len(),
                });
            }
        }
        Ok(())
    }

    pub fn earth_sun_au(&self) -> f64 {
        self.earth_sun_au.unwrap_or_else(|| earth_sun_distance(self.day_of_year))
    }

    /// Convert a DN matrix to radiance. No-data pixels stay zero.
    pub fn to_radiance(&self, dn: &PixelMatrix) -> Result<PixelMatrix> {
        self.validate()?;
        map_bands(dn, |band, v| {
            self.sensor
                .radiance(v, band, self.abscal_factor[band], self.effective_bandwidth[band])
        })
    }

    /// Convert a radiance matrix to reflectance. No-data pixels stay zero.
    pub fn to_reflectance(&self, radiance: &PixelMatrix) -> Result<PixelMatrix> {
        let d = self.earth_sun_au();
        map_bands(radiance, |band, v| {
            self.sensor.reflectance(v, band, d, self.sun_elevation_deg)
        })
    }

}

/// Apply `f(band, value)` to every band of every pixel that carries data.
fn map_bands(pixels: &PixelMatrix, f: impl Fn(usize, f64) -> f64) -> Result<PixelMatrix> {
    if pixels.band_count() != BAND_COUNT {
        return Err(Error::DimensionMismatch {
            context: "calibration band count",
            expected: BAND_COUNT,
            actual: pixels.band_count(),
        });
    }
    let mut data = pixels.data().clone();
    for mut row in data.axis_iter_mut(Axis(0)) {
        if row.iter().all(|&v| v == 0.0) {
            continue;
        }
        for (band, v) in row.iter_mut().enumerate() {
            *v = f(band, *v);
        }
    }
    pixels.with_data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn scene() -> SceneParams {
        SceneParams {
            sensor: Sensor::Wv02,
            sun_elevation_deg: 30.0,
            day_of_year: 4,
            earth_sun_au: None,
            abscal_factor: vec![0.01; BAND_COUNT],
            effective_bandwidth: vec![0.05; BAND_COUNT],
            atmospheric_correction: None,
        }
    }

    /// Band b = (0.2 + 0.1 b) · NIR2 + (3 + b), exactly.
    fn linear_samples() -> Vec<Vec<f64>> {
        let nir2: Vec<f64> = (1..=12).map(|i| 4.0 * f64::from(i)).collect();
        let mut bands: Vec<Vec<f64>> = (0..CORRECTED_BANDS)
            .map(|b| {
                let slope = 0.2 + 0.1 * b as f64;
                nir2.iter().map(|x| slope * x + 3.0 + b as f64).collect()
            })
            .collect();
        bands.push(nir2);
        bands
    }

    #[test]
    fn distance_extremes() {
        assert_relative_eq!(earth_sun_distance(4), 0.98328, epsilon = 1e-5);
        // Aphelion roughly half a year later.
        assert!(earth_sun_distance(186) > 1.016);
    }

    #[test]
    fn radiance_formula() {
        let r = Sensor::Wv03.radiance(100.0, 2, 0.01, 0.05);
        assert_relative_eq!(r, 0.938 * 100.0 * 0.2 - 4.996, epsilon = 1e-12);
    }

    #[test]
    fn reflectance_formula() {
        let r = Sensor::Wv02.reflectance(100.0, 0, 1.0, 90.0);
        assert_relative_eq!(r, 100.0 * PI / 1758.2229, epsilon = 1e-12);
    }

    #[test]
    fn no_data_pixels_stay_zero() {
        let mut data = Array2::<f64>::zeros((2, BAND_COUNT));
        data.row_mut(1).fill(200.0);
        let dn = PixelMatrix::new(data, 1, 2).unwrap();
        let rad = scene().to_radiance(&dn).unwrap();
        assert!(rad.pixel(0).iter().all(|&v| v == 0.0));
        assert_relative_eq!(rad.pixel(1)[0], 1.151 * 200.0 * 0.2 - 7.478, epsilon = 1e-12);
        let refl = scene().to_reflectance(&rad).unwrap();
        assert!(refl.pixel(0).iter().all(|&v| v == 0.0));
        assert!(refl.pixel(1)[0] > 0.0);
    }

    #[test]
    fn short_tables_are_rejected() {
        let mut s = scene();
        s.effective_bandwidth.pop();
        assert!(matches!(
            s.to_radiance(&PixelMatrix::zeros(1, 1, BAND_COUNT)),
            Err(Error::DimensionMismatch { actual: 7, .. })
        ));
    }

    #[test]
    fn intercepts_recover_path_radiance() {
        let fit = DarkTargetFit::fit(&linear_samples()).unwrap();
        assert!(fit.passed);
        assert_eq!(fit.bands.len(), CORRECTED_BANDS);
        for (b, f) in fit.bands.iter().enumerate() {
            assert_relative_eq!(f.slope, 0.2 + 0.1 * b as f64, epsilon = 1e-9);
            assert_relative_eq!(f.intercept, 3.0 + b as f64, epsilon = 1e-9);
            assert!(f.misfit < 1e-12 && f.passed);
        }
        let c = fit.corrections();
        assert_relative_eq!(c[6], 9.0, epsilon = 1e-9);
    }

    #[test]
    fn scattered_bands_fail_the_fit() {
        let mut samples = linear_samples();
        // ±4 around the line: misfit 16 on each scattered band.
        for band in samples.iter_mut().take(3) {
            for (i, v) in band.iter_mut().enumerate() {
                *v += if i % 2 == 0 { 4.0 } else { -4.0 };
            }
        }
        let fit = DarkTargetFit::fit(&samples).unwrap();
        assert!(!fit.bands[0].passed);
        assert!(fit.bands[0].misfit > HARD_FAIL_LIMIT);
        assert!(fit.bands[3].passed);
        // Three hard failures still leave the set usable; a fourth rejects it.
        assert!(fit.passed);
        for (i, v) in samples[3].iter_mut().enumerate() {
            *v += if i % 2 == 0 { 4.0 } else { -4.0 };
        }
        assert!(!DarkTargetFit::fit(&samples).unwrap().passed);
    }

    #[test]
    fn non_positive_samples_do_not_count_towards_misfit() {
        let f = fit_line(&[1.0, 2.0, 3.0, 4.0], &[0.0, 0.0, 0.0, 8.0]);
        let all = (0..4)
            .map(|i| {
                let y = [0.0, 0.0, 0.0, 8.0][i];
                (y - (f.slope * (i + 1) as f64 + f.intercept)).powi(2)
            })
            .sum::<f64>();
        let positive = (8.0 - (f.slope * 4.0 + f.intercept)).powi(2);
        assert_relative_eq!(f.misfit, positive / 4.0, epsilon = 1e-12);
        assert!(f.misfit < all / 4.0);
    }

    #[test]
    fn too_few_samples_are_rejected() {
        let samples = vec![vec![1.0]; BAND_COUNT];
        assert!(matches!(
            DarkTargetFit::fit(&samples),
            Err(Error::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn dark_target_export_is_parsed() {
        let text = "ROI: dark water\nPoints: 3\n\n\
                    B1  10.5  11.0  12.5\n\
                    B2  9  9.5  10\n\
                    B3  8  8  8\n\
                    B4  7  7  7\n\
                    B5  6  6  6\n\
                    B6  5  5  5\n\
                    B7  4  4  4\n\
                    B8  1  2  3\n";
        let rows = parse_dark_targets(text).unwrap();
        assert_eq!(rows.len(), BAND_COUNT);
        assert_eq!(rows[0], vec![10.5, 11.0, 12.5]);
        assert_eq!(rows[7], vec![1.0, 2.0, 3.0]);

        let bad = text.replace("9.5", "n/a");
        assert!(matches!(
            parse_dark_targets(&bad),
            Err(Error::MalformedSamples { line: 5, .. })
        ));
        assert!(matches!(
            parse_dark_targets("B1 1 2\n"),
            Err(Error::MalformedSamples { .. })
        ));
    }

    #[test]
    fn corrections_average_over_sample_sets() {
        let a = DarkTargetFit::fit(&linear_samples()).unwrap();
        let mut shifted = linear_samples();
        for band in shifted.iter_mut().take(CORRECTED_BANDS) {
            band.iter_mut().for_each(|v| *v += 2.0);
        }
        let b = DarkTargetFit::fit(&shifted).unwrap();
        let mean = mean_corrections(&[a, b]).unwrap();
        for (band, c) in mean.iter().enumerate() {
            assert_relative_eq!(*c, 4.0 + band as f64, epsilon = 1e-9);
        }
        assert!(mean_corrections(&[]).is_err());
    }

    #[test]
    fn correction_is_subtracted_from_bands_one_to_seven() {
        let mut data = Array2::<f64>::zeros((2, BAND_COUNT));
        data.row_mut(1).fill(50.0);
        let rad = PixelMatrix::new(data, 1, 2).unwrap();
        let corrections: Vec<f64> = (0..CORRECTED_BANDS).map(|b| b as f64).collect();
        let out = correct_atmosphere(&rad, &corrections).unwrap();
        assert!(out.pixel(0).iter().all(|&v| v == 0.0));
        for b in 0..CORRECTED_BANDS {
            assert_eq!(out.pixel(1)[b], 50.0 - b as f64);
        }
        assert_eq!(out.pixel(1)[BAND_COUNT - 1], 50.0);
        assert!(matches!(
            correct_atmosphere(&rad, &corrections[..3]),
            Err(Error::DimensionMismatch { expected: 7, actual: 3, .. })
        ));
    }

    #[test]
    fn params_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        std::fs::write(
            &path,
            r#"{"sensor":"WV03","sun_elevation_deg":22.5,"day_of_year":350,
                "abscal_factor":[0.01,0.01,0.01,0.01,0.01,0.01,0.01,0.01],
                "effective_bandwidth":[0.04,0.05,0.06,0.04,0.05,0.04,0.1,0.09]}"#,
        )
        .unwrap();
        let p = SceneParams::from_json_file(&path).unwrap();
        assert_eq!(p.sensor, Sensor::Wv03);
        assert_relative_eq!(p.earth_sun_au(), earth_sun_distance(350));
        assert_eq!(p.atmospheric_correction, None);
    }

    #[test]
    fn atmospheric_correction_length_is_checked() {
        let mut s = scene();
        s.atmospheric_correction = Some(vec![1.0; CORRECTED_BANDS]);
        assert!(s.validate().is_ok());
        s.atmospheric_correction = Some(vec![1.0; BAND_COUNT]);
        assert!(matches!(
            s.validate(),
            Err(Error::DimensionMismatch { expected: 7, actual: 8, .. })
        ));
    }
}
