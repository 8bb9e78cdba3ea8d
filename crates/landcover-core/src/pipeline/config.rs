//! Serializable pipeline configuration and endmember resolution.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::rounds::RoundSpec;
use crate::error::{Error, Result};
use crate::library::SpectralLibrary;
use crate::spectrum::{self, Endmember, BAND_COUNT};
use crate::threshold::Threshold;
use crate::unmix::DEFAULT_CHUNK_PIXELS;

/// Where an endmember spectrum comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndmemberSource {
    /// All-zero placeholder.
    Zero,
    /// Literal reflectance values, one per band.
    Spectrum(Vec<f64>),
    /// Library sample ID (last match wins).
    Sample(String),
    /// Element-wise median of a library category.
    Median(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndmemberConfig {
    pub name: String,
    pub source: EndmemberSource,
    pub threshold: Threshold,
}

impl EndmemberConfig {
    pub fn new(name: &str, source: EndmemberSource, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            source,
            threshold: Threshold::from(threshold),
        }
    }

    fn literal(name: &str, values: &[f64; BAND_COUNT], threshold: f64) -> Self {
        Self::new(name, EndmemberSource::Spectrum(values.to_vec()), threshold)
    }

    fn resolve(&self, library: Option<&SpectralLibrary>) -> Result<Endmember> {
        let spectrum = match &self.source {
            EndmemberSource::Zero => return Ok(Endmember::placeholder(&self.name, BAND_COUNT)),
            EndmemberSource::Spectrum(v) => v.clone(),
            EndmemberSource::Sample(id) => require(library, &self.name)?.lookup(id)?.to_vec(),
            EndmemberSource::Median(category) => {
                require(library, &self.name)?.median_by_category(category)?
            }
        };
        if spectrum.len() != BAND_COUNT {
            return Err(Error::DimensionMismatch {
                context: "endmember spectrum length",
                expected: BAND_COUNT,
                actual: spectrum.len(),
            });
        }
        Ok(Endmember::new(&self.name, spectrum))
    }
}

fn require<'a>(
    library: Option<&'a SpectralLibrary>,
    endmember: &str,
) -> Result<&'a SpectralLibrary> {
    library.ok_or_else(|| Error::MissingResource {
        path: PathBuf::from(format!("spectral library (needed by endmember '{endmember}')")),
    })
}

/// First round: everything is unmixed against these five.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialRoundConfig {
    pub atmosphere: EndmemberConfig,
    pub blue_ice: EndmemberConfig,
    pub snow: EndmemberConfig,
    pub rock_proxy_1: EndmemberConfig,
    pub rock_proxy_2: EndmemberConfig,
}

/// Third round, restricted to snow/ice pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowIceRoundConfig {
    pub snow: EndmemberConfig,
    pub blue_ice: EndmemberConfig,
    pub water: EndmemberConfig,
}

/// Which pixels feed a reserved round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    /// No pixels; the round only occupies its output slots.
    #[default]
    None,
    LitRock,
    SnowOrIce,
    /// Every pixel inside the border.
    All,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservedRoundConfig {
    #[serde(default)]
    pub gate: Gate,
    #[serde(default)]
    pub endmembers: Vec<EndmemberConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub initial: InitialRoundConfig,
    pub rock: Vec<EndmemberConfig>,
    pub snow_ice_water: SnowIceRoundConfig,
    pub reserved: Vec<ReservedRoundConfig>,
    /// Dark pixels have albedo below this fraction of the mean scene albedo.
    pub dark_albedo_fraction: f64,
    pub unknown_rms: f64,
    pub rock_rms: f64,
    pub normalize_abundances: bool,
    pub slots_per_round: usize,
    pub chunk_pixels: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        use EndmemberSource::Zero;
        Self {
            initial: InitialRoundConfig {
                atmosphere: EndmemberConfig::literal("atmosphere", &spectrum::ATMOSPHERE, 0.6),
                blue_ice: EndmemberConfig::literal("blue_ice", &spectrum::BLUE_ICE, 0.4),
                snow: EndmemberConfig::literal("snow", &spectrum::SNOW, 0.5),
                rock_proxy_1: EndmemberConfig::new("rock_proxy_1", Zero, -1.0),
                rock_proxy_2: EndmemberConfig::new("rock_proxy_2", Zero, -1.0),
            },
            rock: vec![
                EndmemberConfig::literal(
                    "more_mafic_dolerite",
                    &spectrum::MORE_MAFIC_DOLERITE,
                    0.75,
                ),
                EndmemberConfig::literal(
                    "less_mafic_dolerite",
                    &spectrum::LESS_MAFIC_DOLERITE,
                    0.1,
                ),
                EndmemberConfig::literal("granite", &spectrum::GRANITE, 0.55),
                EndmemberConfig::literal("sandstone", &spectrum::SANDSTONE, 0.4),
            ],
            snow_ice_water: SnowIceRoundConfig {
                snow: EndmemberConfig::literal("snow", &spectrum::SNOW, 0.5),
                blue_ice: EndmemberConfig::literal("blue_ice", &spectrum::BLUE_ICE, 0.4),
                water: EndmemberConfig::literal("water", &spectrum::WATER, 0.5),
            },
            reserved: vec![ReservedRoundConfig::default(); 2],
            dark_albedo_fraction: 0.2,
            unknown_rms: 0.4,
            rock_rms: 0.4,
            normalize_abundances: false,
            slots_per_round: 7,
            chunk_pixels: DEFAULT_CHUNK_PIXELS,
        }
    }
}

/// Resolved endmember sets for every round.
#[derive(Debug, Clone)]
pub struct EndmemberCatalog {
    /// Order: atmosphere, blue ice, snow, rock proxy 1, rock proxy 2.
    pub initial: RoundSpec,
    pub rock: RoundSpec,
    /// Order: snow, blue ice, water.
    pub snow_ice_water: RoundSpec,
    pub reserved: Vec<(Gate, RoundSpec)>,
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingResource {
                path: path.to_path_buf(),
            });
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::write(path, e))
    }

    /// Resolve every endmember source. `library` is only consulted by
    /// `sample` and `median` sources.
    pub fn resolve(&self, library: Option<&SpectralLibrary>) -> Result<EndmemberCatalog> {
        let i = &self.initial;
        let s = &self.snow_ice_water;
        Ok(EndmemberCatalog {
            initial: round(
                "initial",
                [&i.atmosphere, &i.blue_ice, &i.snow, &i.rock_proxy_1, &i.rock_proxy_2],
                library,
            )?,
            rock: round("rock", self.rock.iter(), library)?,
            snow_ice_water: round("snow_ice_water", [&s.snow, &s.blue_ice, &s.water], library)?,
            reserved: self
                .reserved
                .iter()
                .enumerate()
                .map(|(k, r)| {
                    let name = format!("reserved_{}", k + 1);
                    Ok((r.gate, round(&name, r.endmembers.iter(), library)?))
                })
                .collect::<Result<_>>()?,
        })
    }
}

fn round<'a>(
    name: &str,
    configs: impl IntoIterator<Item = &'a EndmemberConfig>,
    library: Option<&SpectralLibrary>,
) -> Result<RoundSpec> {
    let mut endmembers = Vec::new();
    let mut thresholds = Vec::new();
    for c in configs {
        endmembers.push(c.resolve(library)?);
        thresholds.push(c.threshold);
    }
    Ok(RoundSpec::new(name, endmembers, thresholds))
}
