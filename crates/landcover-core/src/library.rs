//! Reference spectral library loader.
//!
//! The resource is a whitespace-delimited table with one column per sample.
//! Every row starts with a label. Row 1 holds sample IDs, row 2 the lithology
//! category; further descriptor rows may follow. Band rows begin at the first
//! row (after the two mandatory descriptors) whose values are all numeric:
//!
//! ```text
//! ID        PRR12602  PRR11149  PRR21578
//! Lithology dolerite  dolerite  granite
//! Face      surface   interior  surface
//! b427      0.141     0.082     0.161
//! ...       (8 band rows)
//! ```

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::spectrum::BAND_COUNT;

/// One library sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: String,
    pub category: String,
    pub spectrum: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SpectralLibrary {
    samples: Vec<Sample>,
}

impl SpectralLibrary {
    /// Load the library from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingResource {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse the library table from text.
    pub fn parse(text: &str) -> Result<Self> {
        // (1-based line number, values after the row label)
        let rows: Vec<(usize, Vec<&str>)> = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(i, l)| (i + 1, l.split_whitespace().skip(1).collect()))
            .collect();

        if rows.len() < 2 {
            return Err(Error::MalformedLibrary {
                line: rows.len() + 1,
                reason: "expected ID and category rows".into(),
            });
        }

        let n = rows[0].1.len();
        if n == 0 {
            return Err(Error::MalformedLibrary {
                line: rows[0].0,
                reason: "no samples in ID row".into(),
            });
        }
        for (line, values) in &rows {
            if values.len() != n {
                return Err(Error::MalformedLibrary {
                    line: *line,
                    reason: format!("expected {n} columns, found {}", values.len()),
                });
            }
        }

        let is_numeric = |values: &[&str]| values.iter().all(|v| v.parse::<f64>().is_ok());
        let first_band = (2..rows.len())
            .find(|&i| is_numeric(&rows[i].1))
            .ok_or_else(|| Error::MalformedLibrary {
                line: rows[rows.len() - 1].0,
                reason: "no band rows".into(),
            })?;

        let band_rows = &rows[first_band..];
        if band_rows.len() != BAND_COUNT {
            return Err(Error::MalformedLibrary {
                line: band_rows[0].0,
                reason: format!("expected {BAND_COUNT} band rows, found {}", band_rows.len()),
            });
        }

        let mut spectra = vec![Vec::with_capacity(BAND_COUNT); n];
        for (line, values) in band_rows {
            for (s, v) in values.iter().enumerate() {
                let value = v.parse::<f64>().map_err(|_| Error::MalformedLibrary {
                    line: *line,
                    reason: format!("'{v}' is not a number"),
                })?;
                spectra[s].push(value);
            }
        }

        let samples = spectra
            .into_iter()
            .enumerate()
            .map(|(s, spectrum)| Sample {
                id: rows[0].1[s].to_string(),
                category: rows[1].1[s].to_string(),
                spectrum,
            })
            .collect();

        Ok(Self { samples })
    }

    pub fn from_samples(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in &self.samples {
            if !out.contains(&s.category.as_str()) {
                out.push(&s.category);
            }
        }
        out
    }

    /// Spectrum of the last sample with this ID. Repeat measurements are
    /// listed after the first, so the last entry wins.
    pub fn lookup(&self, id: &str) -> Result<&[f64]> {
        self.samples
            .iter()
            .rev()
            .find(|s| s.id == id)
            .map(|s| s.spectrum.as_slice())
            .ok_or_else(|| Error::NotFound(format!("library sample '{id}'")))
    }

    /// Element-wise median spectrum of every sample in `category`.
    pub fn median_by_category(&self, category: &str) -> Result<Vec<f64>> {
        let members: Vec<&Sample> = self
            .samples
            .iter()
            .filter(|s| s.category == category)
            .collect();
        if members.is_empty() {
            return Err(Error::NotFound(format!("library category '{category}'")));
        }
        let bands = members[0].spectrum.len();
        Ok((0..bands)
            .map(|b| {
                let mut column: Vec<f64> = members.iter().map(|s| s.spectrum[b]).collect();
                median(&mut column)
            })
            .collect())
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}
