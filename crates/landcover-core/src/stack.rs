//! Ordered, named output layers destined for one multi-band raster.

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::mask::Mask;
use crate::pixels::{reshape, BorderMask};

/// Name used for padding bands that never carry a class.
pub const RESERVED: &str = "reserved";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub name: String,
    pub values: Vec<i16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandStack {
    layers: Vec<Layer>,
}

impl BandStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_values(&mut self, name: impl Into<String>, values: Vec<i16>) {
        self.layers.push(Layer {
            name: name.into(),
            values,
        });
    }

    pub fn push_mask(&mut self, name: impl Into<String>, mask: &Mask) {
        self.push_values(name, mask.values().iter().map(|&v| i16::from(v)).collect());
    }

    /// All-zero layer of `len` pixels.
    pub fn push_empty(&mut self, name: impl Into<String>, len: usize) {
        self.push_values(name, vec![0; len]);
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    /// First layer with this name.
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Check that every layer (and the border) holds `height * width` values.
    pub fn validate(&self, border: &BorderMask, height: usize, width: usize) -> Result<()> {
        let n = height * width;
        if border.len() != n {
            return Err(Error::ShapeMismatch {
                layer: "border".into(),
                len: border.len(),
                height,
                width,
            });
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.values.len() != n {
                return Err(Error::ShapeMismatch {
                    layer: format!("band {} ({})", i + 1, layer.name),
                    len: layer.values.len(),
                    height,
                    width,
                });
            }
        }
        Ok(())
    }

    /// Add the border sentinel into every layer and reshape to `(height, width)`.
    ///
    /// The sentinel is added, not assigned, so a border pixel reads −99 plus
    /// whatever the layer held there.
    pub fn to_grids(
        &self,
        border: &BorderMask,
        height: usize,
        width: usize,
    ) -> Result<Vec<Array2<i16>>> {
        self.validate(border, height, width)?;
        self.layers
            .iter()
            .map(|layer| {
                let values: Vec<i16> = layer
                    .values
                    .iter()
                    .zip(border.values())
                    .map(|(&v, &b)| v.saturating_add(b))
                    .collect();
                reshape(&values, height, width, &layer.name)
            })
            .collect()
    }
}
