//! Presence/absence classification of abundance columns.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mask::Mask;

/// Configuration value that disables an endmember's mask.
pub const SKIP_VALUE: f64 = -1.0;

/// Per-endmember cut-off. Serialized as a bare number; −1 means `Skip`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum Threshold {
    /// Emit no mask for this endmember.
    Skip,
    /// Present where abundance is strictly greater than the value.
    Above(f64),
}

impl Threshold {
    pub fn is_skip(&self) -> bool {
        matches!(self, Threshold::Skip)
    }

    /// Mask of pixels whose value exceeds the threshold; `None` for `Skip`.
    pub fn apply(&self, values: impl IntoIterator<Item = f64>) -> Option<Mask> {
        match *self {
            Threshold::Skip => None,
            Threshold::Above(t) => Some(Mask::from(
                values.into_iter().map(|v| v > t).collect::<Vec<bool>>(),
            )),
        }
    }
}

impl From<f64> for Threshold {
    fn from(v: f64) -> Self {
        if v == SKIP_VALUE {
            Threshold::Skip
        } else {
            Threshold::Above(v)
        }
    }
}

impl From<Threshold> for f64 {
    fn from(t: Threshold) -> f64 {
        match t {
            Threshold::Skip => SKIP_VALUE,
            Threshold::Above(v) => v,
        }
    }
}

/// One entry per endmember column: `Some(mask)` or `None` where skipped.
pub fn classify_each(
    abundances: &Array2<f64>,
    thresholds: &[Threshold],
) -> Result<Vec<Option<Mask>>> {
    if abundances.ncols() != thresholds.len() {
        return Err(Error::DimensionMismatch {
            context: "threshold count",
            expected: abundances.ncols(),
            actual: thresholds.len(),
        });
    }
    Ok(thresholds
        .iter()
        .enumerate()
        .map(|(e, t)| t.apply(abundances.column(e).iter().copied()))
        .collect())
}

/// Masks for the non-skipped endmembers, in endmember order.
pub fn presence_masks(abundances: &Array2<f64>, thresholds: &[Threshold]) -> Result<Vec<Mask>> {
    Ok(classify_each(abundances, thresholds)?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn skip_drops_mask_and_comparison_is_strict() {
        let a = array![[0.6, 0.9, 0.1], [0.4, 0.9, 0.0]];
        let t = [Threshold::Above(0.5), Threshold::Skip, Threshold::Above(0.0)];
        let masks = presence_masks(&a, &t).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].values(), &[1, 0]);
        assert_eq!(masks[1].values(), &[1, 0]);
    }

    #[test]
    fn equal_value_is_not_present() {
        let a = array![[0.5], [0.500001]];
        let masks = presence_masks(&a, &[Threshold::Above(0.5)]).unwrap();
        assert_eq!(masks[0].values(), &[0, 1]);
    }

    #[test]
    fn classify_each_keeps_positions() {
        let a = array![[0.6, 0.9]];
        let each = classify_each(&a, &[Threshold::Skip, Threshold::Above(0.1)]).unwrap();
        assert!(each[0].is_none());
        assert_eq!(each[1].as_ref().unwrap().values(), &[1]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let a = array![[0.6, 0.9]];
        assert!(matches!(
            presence_masks(&a, &[Threshold::Above(0.1)]),
            Err(Error::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn json_uses_minus_one_for_skip() {
        let t: Vec<Threshold> = serde_json::from_str("[0.6, -1, 0.55]").unwrap();
        assert_eq!(t, vec![Threshold::Above(0.6), Threshold::Skip, Threshold::Above(0.55)]);
        assert_eq!(serde_json::to_string(&t).unwrap(), "[0.6,-1.0,0.55]");
    }
}
