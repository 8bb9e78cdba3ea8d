//! Multi-round unmixing: each round is gated by the masks of earlier ones.
//!
//! 1. Initial: every pixel against atmosphere, blue ice, snow and two rock
//!    proxies. Derives shadowed rock/ice, snow-or-ice, dark and unknown
//!    pixels, and removes the atmospheric contribution.
//! 2. Rock: lit rock pixels (not covered, not border) against four rock
//!    spectra; also yields the rock RMS map.
//! 3. Snow/ice/water: snow-or-ice pixels against snow, blue ice and water.
//! 4. Reserved rounds: configurable, empty by default.
//!
//! Every round occupies `slots_per_round` output bands; the thresholded rock
//! RMS is the final band.

pub mod config;
pub mod rounds;

use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::library::SpectralLibrary;
use crate::mask::Mask;
use crate::pixels::{BorderMask, PixelMatrix};
use crate::stack::{BandStack, RESERVED};
use crate::unmix::{contribution, UnmixOptions};
use config::{EndmemberCatalog, Gate, PipelineConfig};
use rounds::{RoundOutcome, RoundSpec};

pub use config::{EndmemberConfig, EndmemberSource, ReservedRoundConfig};

/// Name of the final band.
pub const ROCK_RMS: &str = "rock_rms";

// Initial-round endmember positions.
const ATMOSPHERE: usize = 0;
const BLUE_ICE: usize = 1;
const SNOW: usize = 2;
const PROXY_1: usize = 3;
const PROXY_2: usize = 4;

// Snow/ice/water-round positions.
const WATER: usize = 2;

/// Masks derived along the way; all length P.
#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateMasks {
    pub atmosphere: Mask,
    pub blue_ice: Mask,
    pub snow: Mask,
    pub snow_or_ice: Mask,
    pub shadowed_rock: Mask,
    pub shadowed_ice: Mask,
    pub covered: Mask,
    pub dark: Mask,
    pub unknown: Mask,
    pub lit_rock: Mask,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub border: BorderMask,
    pub stack: BandStack,
    pub masks: IntermediateMasks,
    pub initial_rms: Vec<f64>,
    /// Continuous residual of the rock round (0 outside lit rock).
    pub rock_rms: Vec<f64>,
    /// Input with the atmospheric contribution subtracted.
    pub atmosphere_removed: PixelMatrix,
}

pub struct UnmixingPipeline {
    config: PipelineConfig,
    catalog: EndmemberCatalog,
}

impl UnmixingPipeline {
    /// Resolve endmembers and check that every round fits its output slots.
    pub fn new(config: PipelineConfig, library: Option<&SpectralLibrary>) -> Result<Self> {
        let catalog = config.resolve(library)?;
        let pipeline = Self { config, catalog };
        let slots = pipeline.config.slots_per_round;
        for (round, names) in pipeline.round_layouts().iter().enumerate() {
            // The initial round also needs a slot for `unknown`.
            let needed = names.len() + usize::from(round == 0);
            if needed > slots {
                return Err(Error::DimensionMismatch {
                    context: "masks per round vs slots_per_round",
                    expected: slots,
                    actual: needed,
                });
            }
        }
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &EndmemberCatalog {
        &self.catalog
    }

    fn options(&self) -> UnmixOptions {
        UnmixOptions {
            normalize: self.config.normalize_abundances,
            chunk_pixels: self.config.chunk_pixels,
        }
    }

    /// Unpadded band names of each round, in output order.
    fn round_layouts(&self) -> Vec<Vec<String>> {
        let initial_names = self.catalog.initial.names();
        let mut initial: Vec<String> = ["shadowed_rock", "shadowed_ice", "snow_or_ice", "lit_rock"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        initial.push(initial_names[PROXY_1].clone());
        initial.push(initial_names[PROXY_2].clone());

        let mut layouts = vec![
            initial,
            self.catalog.rock.names(),
            self.catalog.snow_ice_water.names(),
        ];
        layouts.extend(self.catalog.reserved.iter().map(|(_, r)| r.names()));
        layouts
    }

    /// Output band names in raster order.
    pub fn band_names(&self) -> Vec<String> {
        let slots = self.config.slots_per_round;
        let mut names = Vec::new();
        for (round, layout) in self.round_layouts().into_iter().enumerate() {
            let filled = layout.len();
            names.extend(layout);
            // The initial round keeps its last slot for `unknown`.
            let tail = usize::from(round == 0);
            let padding = slots.saturating_sub(filled + tail);
            names.extend(std::iter::repeat(RESERVED.to_string()).take(padding));
            if round == 0 {
                names.push("unknown".to_string());
            }
        }
        names.push(ROCK_RMS.to_string());
        names
    }

    pub fn run(&self, pixels: &PixelMatrix) -> Result<PipelineOutput> {
        let start = Instant::now();
        let p = pixels.pixel_count();
        let options = self.options();
        let border = BorderMask::from_pixels(pixels);
        let interior = border.interior();
        debug!("{} of {} pixels are border", border.border_count(), p);

        // ── Round 1: initial ──────────────────────────────────────────────────
        let t = Instant::now();
        let initial = &self.catalog.initial;
        let first = initial.run(pixels, options)?;
        let atmosphere = first.mask_or_empty(ATMOSPHERE, p);
        let blue_ice = first.mask_or_empty(BLUE_ICE, p);
        let snow = first.mask_or_empty(SNOW, p);

        let snow_or_ice = blue_ice.union(&snow)?;
        let shadowed_rock = snow_or_ice.complement().intersect(&atmosphere)?;
        let shadowed_ice = snow_or_ice.intersect(&atmosphere)?;
        let covered = Mask::union_all(&[&atmosphere, &blue_ice, &snow])?;
        let dark = self.dark_mask(pixels, &interior)?;
        let unknown = Mask::from(
            first
                .rms
                .iter()
                .map(|&r| r > self.config.unknown_rms)
                .collect::<Vec<bool>>(),
        );

        let atmosphere_removed = match &first.abundances {
            Some(a) if !initial.endmembers[ATMOSPHERE].is_degenerate() => {
                let atm = contribution(a, ATMOSPHERE, &initial.endmembers[ATMOSPHERE])?;
                pixels.with_data(pixels.data() - &atm)?
            }
            _ => pixels.clone(),
        };
        debug!("initial round: {:.1} ms", t.elapsed().as_secs_f64() * 1e3);

        // ── Round 2: rock ─────────────────────────────────────────────────────
        let t = Instant::now();
        let lit_rock = interior.and_not(&covered)?;
        let rock_pixels = atmosphere_removed.masked(&lit_rock)?;
        let rock = self.catalog.rock.run(&rock_pixels, options)?;
        let rock_rms = rock.rms.clone();
        debug!(
            "rock round over {} lit pixels: {:.1} ms",
            lit_rock.count(),
            t.elapsed().as_secs_f64() * 1e3
        );

        // ── Round 3: snow / ice / water ───────────────────────────────────────
        let t = Instant::now();
        let siw_pixels = atmosphere_removed.masked(&snow_or_ice)?;
        let siw = self.catalog.snow_ice_water.run(&siw_pixels, options)?;
        let water = siw
            .mask_or_empty(WATER, p)
            .union(&dark.intersect(&snow_or_ice)?)?;
        debug!(
            "snow/ice/water round over {} pixels: {:.1} ms",
            snow_or_ice.count(),
            t.elapsed().as_secs_f64() * 1e3
        );

        // ── Output stack ──────────────────────────────────────────────────────
        let slots = self.config.slots_per_round;
        let mut stack = BandStack::new();

        let initial_names = initial.names();
        let mut round_one = vec![
            ("shadowed_rock".to_string(), shadowed_rock.clone()),
            ("shadowed_ice".to_string(), shadowed_ice.clone()),
            ("snow_or_ice".to_string(), snow_or_ice.clone()),
            ("lit_rock".to_string(), lit_rock.clone()),
            (initial_names[PROXY_1].clone(), first.mask_or_empty(PROXY_1, p)),
            (initial_names[PROXY_2].clone(), first.mask_or_empty(PROXY_2, p)),
        ];
        pad(&mut round_one, slots.saturating_sub(1), p);
        round_one.push(("unknown".to_string(), unknown.clone()));
        push_round(&mut stack, round_one);

        let rock_masks = outcome_masks(&self.catalog.rock, &rock, p);
        push_padded(&mut stack, rock_masks, slots, p);

        let mut siw_masks = outcome_masks(&self.catalog.snow_ice_water, &siw, p);
        if let Some(w) = siw_masks.get_mut(WATER) {
            w.1 = water;
        }
        push_padded(&mut stack, siw_masks, slots, p);

        for (gate, spec) in &self.catalog.reserved {
            let gated = match gate {
                Gate::None => {
                    if spec.has_real_endmembers() {
                        warn!(
                            "round '{}' has endmembers but no gate; its bands stay empty",
                            spec.name
                        );
                    }
                    Mask::empty(p)
                }
                Gate::LitRock => lit_rock.clone(),
                Gate::SnowOrIce => snow_or_ice.clone(),
                Gate::All => interior.clone(),
            };
            let outcome = if gated.count() == 0 {
                empty_outcome(spec, p)
            } else {
                spec.run(&atmosphere_removed.masked(&gated)?, options)?
            };
            push_padded(&mut stack, outcome_masks(spec, &outcome, p), slots, p);
        }

        let rock_rms_mask = Mask::from(
            rock_rms
                .iter()
                .map(|&r| r > self.config.rock_rms)
                .collect::<Vec<bool>>(),
        );
        stack.push_mask(ROCK_RMS, &rock_rms_mask);

        info!(
            "pipeline finished: {} pixels, {} bands, {:.2} s",
            p,
            stack.len(),
            start.elapsed().as_secs_f64()
        );

        Ok(PipelineOutput {
            border,
            stack,
            masks: IntermediateMasks {
                atmosphere,
                blue_ice,
                snow,
                snow_or_ice,
                shadowed_rock,
                shadowed_ice,
                covered,
                dark,
                unknown,
                lit_rock,
            },
            initial_rms: first.rms,
            rock_rms,
            atmosphere_removed,
        })
    }

    /// Pixels whose albedo is below `dark_albedo_fraction` of the mean
    /// albedo inside the border.
    fn dark_mask(&self, pixels: &PixelMatrix, interior: &Mask) -> Result<Mask> {
        let albedo = pixels.albedo();
        let n = interior.count();
        let mean = if n == 0 {
            0.0
        } else {
            albedo
                .iter()
                .enumerate()
                .filter(|(i, _)| interior.is_set(*i))
                .map(|(_, a)| a)
                .sum::<f64>()
                / n as f64
        };
        let cut = self.config.dark_albedo_fraction * mean;
        Mask::from(albedo.iter().map(|&a| a < cut).collect::<Vec<bool>>()).intersect(interior)
    }
}

fn empty_outcome(spec: &RoundSpec, p: usize) -> RoundOutcome {
    RoundOutcome {
        masks: spec.thresholds.iter().map(|_| None).collect(),
        rms: vec![0.0; p],
        abundances: None,
    }
}

/// One (name, mask) per endmember; skipped thresholds become empty bands.
fn outcome_masks(spec: &RoundSpec, outcome: &RoundOutcome, p: usize) -> Vec<(String, Mask)> {
    spec.names()
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, outcome.mask_or_empty(i, p)))
        .collect()
}

fn pad(bands: &mut Vec<(String, Mask)>, slots: usize, p: usize) {
    while bands.len() < slots {
        bands.push((RESERVED.to_string(), Mask::empty(p)));
    }
}

fn push_padded(stack: &mut BandStack, mut bands: Vec<(String, Mask)>, slots: usize, p: usize) {
    pad(&mut bands, slots, p);
    push_round(stack, bands);
}

fn push_round(stack: &mut BandStack, bands: Vec<(String, Mask)>) {
    for (name, mask) in bands {
        stack.push_mask(name, &mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::{self, BAND_COUNT};
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// 2×3 scene: border, snow, blue ice, granite, shadow (atmosphere), sandstone.
    fn scene() -> PixelMatrix {
        let rows: Vec<[f64; BAND_COUNT]> = vec![
            [0.0; BAND_COUNT],
            spectrum::SNOW,
            spectrum::BLUE_ICE,
            spectrum::GRANITE,
            spectrum::ATMOSPHERE,
            spectrum::SANDSTONE,
        ];
        let data = Array2::from_shape_vec((6, BAND_COUNT), rows.concat()).unwrap();
        PixelMatrix::new(data, 2, 3).unwrap()
    }

    fn pipeline() -> UnmixingPipeline {
        UnmixingPipeline::new(PipelineConfig::default(), None).unwrap()
    }

    #[test]
    fn default_layout_has_36_bands() {
        let names = pipeline().band_names();
        assert_eq!(names.len(), 36);
        assert_eq!(
            &names[..7],
            &[
                "shadowed_rock",
                "shadowed_ice",
                "snow_or_ice",
                "lit_rock",
                "rock_proxy_1",
                "rock_proxy_2",
                "unknown",
            ]
        );
        assert_eq!(
            &names[7..11],
            &["more_mafic_dolerite", "less_mafic_dolerite", "granite", "sandstone"]
        );
        assert_eq!(&names[14..17], &["snow", "blue_ice", "water"]);
        assert!(names[21..35].iter().all(|n| n == RESERVED));
        assert_eq!(names[35], ROCK_RMS);
    }

    #[test]
    fn stack_matches_band_names() {
        let p = pipeline();
        let out = p.run(&scene()).unwrap();
        let names = p.band_names();
        assert_eq!(out.stack.names(), names.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(out.stack.layers().iter().all(|l| l.values.len() == 6));
    }

    #[test]
    fn reserved_rounds_are_empty() {
        let out = pipeline().run(&scene()).unwrap();
        for layer in &out.stack.layers()[21..35] {
            assert!(layer.values.iter().all(|&v| v == 0), "{} not empty", layer.name);
        }
    }

    #[test]
    fn pure_pixels_are_classified() {
        let out = pipeline().run(&scene()).unwrap();
        let m = &out.masks;
        assert_eq!(out.border.values(), &[-99, 0, 0, 0, 0, 0]);
        assert!(m.snow.is_set(1));
        assert!(m.blue_ice.is_set(2));
        assert!(m.snow_or_ice.is_set(1) && m.snow_or_ice.is_set(2));
        assert!(m.atmosphere.is_set(4));
        assert!(m.shadowed_rock.is_set(4));
        assert!(m.lit_rock.is_set(3) && m.lit_rock.is_set(5));

        let granite = out.stack.layer("granite").unwrap();
        assert_eq!(granite.values[3], 1);
        let sandstone = out.stack.layer("sandstone").unwrap();
        assert_eq!(sandstone.values[5], 1);
        let snow = out.stack.layer("snow").unwrap();
        assert_eq!(snow.values[1], 1);
    }

    /// 2×3 scene of mixed pixels: snow, atmosphere over snow, dim blue ice
    /// and a spectrum no endmember combination fits.
    fn mixed_scene() -> PixelMatrix {
        let hazy_snow: Vec<f64> = spectrum::SNOW
            .iter()
            .zip(spectrum::ATMOSPHERE)
            .map(|(s, a)| 0.7 * s + 0.8 * a)
            .collect();
        let dim_ice: Vec<f64> = spectrum::BLUE_ICE.iter().map(|v| 0.5 * v).collect();
        let rows: Vec<Vec<f64>> = vec![
            spectrum::SNOW.to_vec(),
            spectrum::SNOW.to_vec(),
            spectrum::SNOW.to_vec(),
            hazy_snow,
            dim_ice,
            vec![2.0, 0.0, 2.0, 0.0, 2.0, 0.0, 2.0, 0.0],
        ];
        let data = Array2::from_shape_vec((6, BAND_COUNT), rows.concat()).unwrap();
        PixelMatrix::new(data, 2, 3).unwrap()
    }

    #[test]
    fn shadowed_ice_needs_atmosphere_over_snow_or_ice() {
        let out = pipeline().run(&mixed_scene()).unwrap();
        assert_eq!(out.masks.shadowed_ice.values(), &[0, 0, 0, 1, 0, 1]);
        assert_eq!(out.stack.layer("shadowed_ice").unwrap().values, vec![0, 0, 0, 1, 0, 1]);
        assert_eq!(out.masks.shadowed_rock.count(), 0);
    }

    #[test]
    fn dark_snow_or_ice_joins_water() {
        let out = pipeline().run(&mixed_scene()).unwrap();
        assert_eq!(out.masks.dark.values(), &[0, 0, 0, 0, 1, 0]);
        assert_eq!(out.stack.layer("water").unwrap().values, vec![0, 0, 0, 0, 1, 0]);
    }

    #[test]
    fn poorly_fitted_pixels_are_unknown() {
        let out = pipeline().run(&mixed_scene()).unwrap();
        assert_eq!(out.masks.unknown.values(), &[0, 0, 0, 0, 0, 1]);
        assert_eq!(out.stack.layer("unknown").unwrap().values, vec![0, 0, 0, 0, 0, 1]);
        assert!(out.initial_rms[5] > 0.9);
        assert!(out.initial_rms[..5].iter().all(|&r| r < 1e-9));
    }

    #[test]
    fn atmosphere_is_subtracted_at_full_strength() {
        let out = pipeline().run(&mixed_scene()).unwrap();
        let cleared = out.atmosphere_removed.pixel(3);
        for (b, &v) in cleared.iter().enumerate() {
            assert_relative_eq!(v, 0.7 * spectrum::SNOW[b], epsilon = 1e-9);
        }
        // Pixels without atmosphere are left alone.
        let scene = mixed_scene();
        for (v, orig) in out.atmosphere_removed.pixel(4).iter().zip(scene.pixel(4)) {
            assert_relative_eq!(*v, *orig, epsilon = 1e-12);
        }
    }

    #[test]
    fn lit_non_rock_pixel_sets_rock_rms() {
        let mut spike = [0.0; BAND_COUNT];
        spike[4] = 2.0;
        let rows = [spectrum::SNOW, spike].concat();
        let data = Array2::from_shape_vec((2, BAND_COUNT), rows).unwrap();
        let pixels = PixelMatrix::new(data, 1, 2).unwrap();
        let out = pipeline().run(&pixels).unwrap();
        assert_eq!(out.masks.lit_rock.values(), &[0, 1]);
        assert!(out.rock_rms[1] > 0.6);
        assert_eq!(out.rock_rms[0], 0.0);
        assert_eq!(out.stack.layer(ROCK_RMS).unwrap().values, vec![0, 1]);
    }

    #[test]
    fn lit_rock_never_includes_border() {
        let out = pipeline().run(&scene()).unwrap();
        assert!(!out.masks.lit_rock.is_set(0));
        assert_eq!(out.stack.layer("lit_rock").unwrap().values[0], 0);
        assert_eq!(out.rock_rms[0], 0.0);
    }

    #[test]
    fn all_zero_scene_produces_empty_bands() {
        let pixels = PixelMatrix::zeros(2, 2, BAND_COUNT);
        let out = pipeline().run(&pixels).unwrap();
        assert_eq!(out.border.border_count(), 4);
        assert!(out.stack.layers().iter().all(|l| l.values.iter().all(|&v| v == 0)));
        assert!(out.initial_rms.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn too_many_rock_endmembers_for_slots() {
        let mut cfg = PipelineConfig::default();
        cfg.slots_per_round = 3;
        let err = UnmixingPipeline::new(cfg, None).err().unwrap();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, .. }));
    }

    #[test]
    fn reserved_round_with_gate_runs() {
        let mut cfg = PipelineConfig::default();
        cfg.reserved[0] = ReservedRoundConfig {
            gate: Gate::All,
            endmembers: vec![EndmemberConfig::new(
                "granite_again",
                EndmemberSource::Spectrum(spectrum::GRANITE.to_vec()),
                0.9,
            )],
        };
        let p = UnmixingPipeline::new(cfg, None).unwrap();
        assert_eq!(p.band_names()[21], "granite_again");
        let out = p.run(&scene()).unwrap();
        let layer = out.stack.layer("granite_again").unwrap();
        assert_eq!(layer.values[3], 1);
        assert_eq!(layer.values[0], 0);
    }
}
