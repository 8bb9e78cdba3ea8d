/// Radiometric calibration of one raw WorldView-2/3 scene: DN → top-of-
/// atmosphere radiance (`<stem>_rad.tif`) → atmospherically corrected
/// radiance (`<stem>_rad_atmcorr.tif`) → reflectance (`<stem>_refl.tif`).
///
/// Scene factors (sensor, abscal, effective bandwidth, sun elevation, date)
/// come from a JSON parameter file, e.g.
///
/// ```json
/// { "sensor": "WV02", "sun_elevation_deg": 24.1, "day_of_year": 325,
///   "abscal_factor": [..8..], "effective_bandwidth": [..8..],
///   "atmospheric_correction": [..7..] }
/// ```
///
/// Path radiance is taken from `--dark-targets` sample exports when given,
/// otherwise from `atmospheric_correction`.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use landcover_core::radiometry::{self, DarkTargetFit, SceneParams, CORRECTED_BANDS};
use landcover_core::raster::{self, ATMCORR_SUFFIX, RADIANCE_SUFFIX, REFLECTANCE_SUFFIX};
use landcover_core::{PixelMatrix, RasterMeta, ReflectanceScale, BAND_COUNT};

#[derive(Parser, Debug)]
#[command(name = "calibrate", about = "Convert raw WorldView-2/3 DN to radiance and reflectance")]
struct Args {
    /// Raw 8-band scene
    #[arg(long)]
    input: PathBuf,

    /// Scene parameter JSON
    #[arg(long)]
    params: PathBuf,

    /// Where outputs are written (created if absent)
    #[arg(long)]
    output_dir: PathBuf,

    /// Dark-target radiance exports; their regressions override the
    /// correction in the parameter file
    #[arg(long, num_args = 1..)]
    dark_targets: Vec<PathBuf>,
}

/// Output path for `input` inside `dir`.
fn output_in(dir: &Path, input: &Path, suffix: &str) -> PathBuf {
    let name = raster::derived_path(input, suffix);
    dir.join(name.file_name().unwrap_or(name.as_os_str()))
}

fn to_planes(pixels: &PixelMatrix) -> Vec<Vec<f32>> {
    (0..pixels.band_count())
        .map(|b| pixels.band(b).into_iter().map(|v| v as f32).collect())
        .collect()
}

fn write_if_absent(path: &Path, pixels: &PixelMatrix, meta: &RasterMeta) -> Result<()> {
    if path.exists() {
        info!("{} already exists, skipping", path.display());
        return Ok(());
    }
    raster::write_float_bands(path, &to_planes(pixels), meta, 0.0)
        .with_context(|| format!("Cannot write {}", path.display()))
}

/// Mean path radiance over every dark-target export.
fn fit_dark_targets(paths: &[PathBuf]) -> Result<Vec<f64>> {
    let mut fits = Vec::with_capacity(paths.len());
    for path in paths {
        let text =
            fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        let samples = radiometry::parse_dark_targets(&text)
            .with_context(|| format!("Cannot parse {}", path.display()))?;
        let fit =
            DarkTargetFit::fit(&samples).with_context(|| format!("Cannot fit {}", path.display()))?;
        for (band, f) in fit.bands.iter().enumerate() {
            info!(
                "{} B{}: correction {:.4}, misfit {:.3} ({})",
                path.display(),
                band + 1,
                f.intercept,
                f.misfit,
                if f.passed { "pass" } else { "fail" }
            );
        }
        if !fit.passed {
            warn!("{}: dark-target regression failed on too many bands", path.display());
        }
        fits.push(fit);
    }
    Ok(radiometry::mean_corrections(&fits)?)
}

fn corrections_for(params: &SceneParams, dark_targets: &[PathBuf]) -> Result<Vec<f64>> {
    if !dark_targets.is_empty() {
        return fit_dark_targets(dark_targets);
    }
    match &params.atmospheric_correction {
        Some(c) => Ok(c.clone()),
        None => {
            warn!("no atmospheric correction given; path radiance assumed zero");
            Ok(vec![0.0; CORRECTED_BANDS])
        }
    }
}

struct Outputs {
    radiance: PathBuf,
    corrected: PathBuf,
    reflectance: PathBuf,
}

fn calibrate(
    input: &Path,
    params: &SceneParams,
    corrections: &[f64],
    output_dir: &Path,
) -> Result<Outputs> {
    let out = Outputs {
        radiance: output_in(output_dir, input, RADIANCE_SUFFIX),
        corrected: output_in(output_dir, input, ATMCORR_SUFFIX),
        reflectance: output_in(output_dir, input, REFLECTANCE_SUFFIX),
    };
    if [&out.radiance, &out.corrected, &out.reflectance].iter().all(|p| p.exists()) {
        info!("{} already calibrated, skipping", input.display());
        return Ok(out);
    }

    let (dn, meta) = raster::read_raster(input, BAND_COUNT, ReflectanceScale::Unit)
        .with_context(|| format!("Cannot read {}", input.display()))?;
    info!(
        "{}: {:?}, sun elevation {:.2}°, Earth–Sun distance {:.5} AU",
        input.display(),
        params.sensor,
        params.sun_elevation_deg,
        params.earth_sun_au()
    );
    let radiance = params.to_radiance(&dn)?;
    write_if_absent(&out.radiance, &radiance, &meta)?;
    let corrected = radiometry::correct_atmosphere(&radiance, corrections)?;
    write_if_absent(&out.corrected, &corrected, &meta)?;
    let reflectance = params.to_reflectance(&corrected)?;
    write_if_absent(&out.reflectance, &reflectance, &meta)?;
    Ok(out)
}

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    builder.format_timestamp_secs();
    builder.init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let params = SceneParams::from_json_file(&args.params)
        .with_context(|| format!("Cannot load scene parameters {}", args.params.display()))?;
    let corrections = corrections_for(&params, &args.dark_targets)?;
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Cannot create {}", args.output_dir.display()))?;
    calibrate(&args.input, &params, &corrections, &args.output_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcover_core::radiometry::Sensor;

    fn params() -> SceneParams {
        SceneParams {
            sensor: Sensor::Wv02,
            sun_elevation_deg: 30.0,
            day_of_year: 100,
            earth_sun_au: None,
            abscal_factor: vec![0.01; BAND_COUNT],
            effective_bandwidth: vec![0.05; BAND_COUNT],
            atmospheric_correction: Some(vec![1.0; CORRECTED_BANDS]),
        }
    }

    #[test]
    fn outputs_land_in_output_dir() {
        let p = output_in(Path::new("/out"), Path::new("/raw/WV02_scene.tif"), RADIANCE_SUFFIX);
        assert_eq!(p, PathBuf::from("/out/WV02_scene_rad.tif"));
        let p = output_in(Path::new("/out"), Path::new("/raw/WV02_scene.tif"), ATMCORR_SUFFIX);
        assert_eq!(p, PathBuf::from("/out/WV02_scene_rad_atmcorr.tif"));
    }

    #[test]
    fn calibrates_scene_and_keeps_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.tif");
        let planes: Vec<Vec<f32>> = (0..BAND_COUNT)
            .map(|_| vec![0.0, 300.0, 600.0, 900.0])
            .collect();
        let meta = RasterMeta::new(2, 2, BAND_COUNT);
        raster::write_float_bands(&input, &planes, &meta, 0.0).unwrap();
        let params = params();

        let out_dir = dir.path().join("cal");
        fs::create_dir_all(&out_dir).unwrap();
        let out = calibrate(&input, &params, &[1.0; CORRECTED_BANDS], &out_dir).unwrap();
        assert!(out.radiance.exists() && out.corrected.exists() && out.reflectance.exists());

        let read = |p: &Path| raster::read_raster(p, BAND_COUNT, ReflectanceScale::Unit).unwrap().0;
        let rad = read(out.radiance.as_path());
        let cor = read(out.corrected.as_path());
        assert!((rad.pixel(1)[0] - cor.pixel(1)[0] - 1.0).abs() < 1e-3);
        assert_eq!(rad.pixel(1)[7], cor.pixel(1)[7]);

        let refl = read(out.reflectance.as_path());
        assert!(refl.pixel(0).iter().all(|&v| v == 0.0));
        assert!(refl.pixel(3)[0] > refl.pixel(1)[0]);
        let expected = params.to_reflectance(&cor).unwrap();
        assert!((refl.pixel(1)[0] - expected.pixel(1)[0]).abs() < 1e-5);
    }

    #[test]
    fn dark_targets_override_parameter_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dark.txt");
        // Band b = NIR2 + 2: every correction is 2.
        let mut text = String::from("ROI export\n");
        for b in 1..=BAND_COUNT {
            let offset = if b == BAND_COUNT { 0.0 } else { 2.0 };
            let row: Vec<String> = (1..=5).map(|i| format!("{}", f64::from(i) + offset)).collect();
            text.push_str(&format!("B{b}  {}\n", row.join("  ")));
        }
        fs::write(&path, text).unwrap();

        let corrections = corrections_for(&params(), &[path]).unwrap();
        assert_eq!(corrections.len(), CORRECTED_BANDS);
        assert!(corrections.iter().all(|c| (c - 2.0).abs() < 1e-9));

        assert_eq!(corrections_for(&params(), &[]).unwrap(), vec![1.0; CORRECTED_BANDS]);
        let mut bare = params();
        bare.atmospheric_correction = None;
        assert_eq!(corrections_for(&bare, &[]).unwrap(), vec![0.0; CORRECTED_BANDS]);
    }
}
