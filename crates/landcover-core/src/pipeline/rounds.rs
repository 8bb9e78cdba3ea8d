//! One unmix → threshold → residual pass over a gated pixel set.

use log::debug;

use crate::error::Result;
use crate::mask::Mask;
use crate::pixels::PixelMatrix;
use crate::spectrum::Endmember;
use crate::threshold::{classify_each, Threshold};
use crate::unmix::{rms, Abundances, UnmixOptions, Unmixer};

/// Endmembers and thresholds for one round, in output order.
#[derive(Debug, Clone)]
pub struct RoundSpec {
    pub name: String,
    pub endmembers: Vec<Endmember>,
    pub thresholds: Vec<Threshold>,
}

#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// `None` where the threshold is `Skip`.
    pub masks: Vec<Option<Mask>>,
    pub rms: Vec<f64>,
    /// `None` when the solver was not run.
    pub abundances: Option<Abundances>,
}

impl RoundSpec {
    pub fn new(
        name: impl Into<String>,
        endmembers: Vec<Endmember>,
        thresholds: Vec<Threshold>,
    ) -> Self {
        Self {
            name: name.into(),
            endmembers,
            thresholds,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.endmembers.iter().map(|e| e.name.clone()).collect()
    }

    /// True if at least one endmember can receive abundance.
    pub fn has_real_endmembers(&self) -> bool {
        self.endmembers.iter().any(|e| !e.is_degenerate())
    }

    pub fn run(&self, pixels: &PixelMatrix, options: UnmixOptions) -> Result<RoundOutcome> {
        let p = pixels.pixel_count();
        if !self.has_real_endmembers() {
            debug!("round '{}': no real endmembers, solver not run", self.name);
            return Ok(RoundOutcome {
                masks: self
                    .thresholds
                    .iter()
                    .map(|t| (!t.is_skip()).then(|| Mask::empty(p)))
                    .collect(),
                rms: vec![0.0; p],
                abundances: None,
            });
        }
        let abundances = Unmixer::new(&self.endmembers, options)?.unmix(pixels)?;
        let masks = classify_each(abundances.values(), &self.thresholds)?;
        let rms = rms(&abundances, &self.endmembers, pixels)?;
        debug!(
            "round '{}': {} of {} mask(s) emitted",
            self.name,
            masks.iter().flatten().count(),
            masks.len()
        );
        Ok(RoundOutcome {
            masks,
            rms,
            abundances: Some(abundances),
        })
    }
}

impl RoundOutcome {
    /// Mask `i`, or an all-absent mask of `len` pixels if it was skipped.
    pub fn mask_or_empty(&self, i: usize, len: usize) -> Mask {
        self.masks
            .get(i)
            .cloned()
            .flatten()
            .unwrap_or_else(|| Mask::empty(len))
    }
}
