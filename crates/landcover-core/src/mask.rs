//! Binary presence/absence masks and their composition.

use crate::error::{Error, Result};

/// Length-P vector of 0/1 values, one per pixel in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask(Vec<u8>);

impl Mask {
    /// All-absent mask.
    pub fn empty(len: usize) -> Self {
        Self(vec![0; len])
    }

    pub fn from_fn(len: usize, f: impl Fn(usize) -> bool) -> Self {
        Self((0..len).map(|i| u8::from(f(i))).collect())
    }

    /// Build from arbitrary integer values; anything non-zero counts as present.
    pub fn from_values(values: &[u8]) -> Self {
        Self(values.iter().map(|&v| u8::from(v != 0)).collect())
    }

    pub fn values(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn is_set(&self, pixel: usize) -> bool {
        self.0[pixel] != 0
    }

    /// Number of present pixels.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&v| v != 0).count()
    }

    /// Sum then clamp to {0, 1}.
    pub fn union(&self, other: &Mask) -> Result<Mask> {
        self.zip_with(other, |a, b| (a + b).min(1))
    }

    /// Union of any number of masks of equal length.
    pub fn union_all(masks: &[&Mask]) -> Result<Mask> {
        let Some((first, rest)) = masks.split_first() else {
            return Ok(Mask::empty(0));
        };
        rest.iter().try_fold((*first).clone(), |acc, m| acc.union(m))
    }

    pub fn intersect(&self, other: &Mask) -> Result<Mask> {
        self.zip_with(other, |a, b| a * b)
    }

    pub fn complement(&self) -> Mask {
        Mask(self.0.iter().map(|&v| u8::from(v == 0)).collect())
    }

    /// Present here and absent in `other`.
    pub fn and_not(&self, other: &Mask) -> Result<Mask> {
        self.intersect(&other.complement())
    }

    fn zip_with(&self, other: &Mask, op: impl Fn(u8, u8) -> u8) -> Result<Mask> {
        if self.len() != other.len() {
            return Err(Error::DimensionMismatch {
                context: "mask length",
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(Mask(
            self.0.iter().zip(&other.0).map(|(&a, &b)| op(a, b)).collect(),
        ))
    }
}

impl From<Vec<bool>> for Mask {
    fn from(v: Vec<bool>) -> Self {
        Self(v.into_iter().map(u8::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_clamps_overlap_to_one() {
        let a = Mask::from_values(&[1, 1, 0, 0]);
        let b = Mask::from_values(&[1, 0, 1, 0]);
        assert_eq!(a.union(&b).unwrap().values(), &[1, 1, 1, 0]);
    }

    #[test]
    fn shadowed_rock_composition() {
        let snow_or_ice = Mask::from_values(&[1, 1, 0, 0]);
        let atmosphere = Mask::from_values(&[1, 0, 1, 0]);
        let rock = snow_or_ice.complement().intersect(&atmosphere).unwrap();
        let ice = snow_or_ice.intersect(&atmosphere).unwrap();
        assert_eq!(rock.values(), &[0, 0, 1, 0]);
        assert_eq!(ice.values(), &[1, 0, 0, 0]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let a = Mask::empty(3);
        let b = Mask::empty(4);
        assert!(matches!(
            a.union(&b),
            Err(Error::DimensionMismatch { expected: 3, actual: 4, .. })
        ));
    }

    #[test]
    fn union_all_of_three() {
        let a = Mask::from_values(&[1, 0, 0]);
        let b = Mask::from_values(&[0, 1, 0]);
        let c = Mask::from_values(&[1, 0, 0]);
        let all = Mask::union_all(&[&a, &b, &c]).unwrap();
        assert_eq!(all.values(), &[1, 1, 0]);
        assert_eq!(all.count(), 2);
    }
}
