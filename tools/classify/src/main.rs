/// Band-sum land-cover classification of reflectance scenes.
///
/// Writes `<stem>_class.tif` next to every 8-band scene with two bands: the
/// summed reflectance and the class code (1 snow/ice, 2 geology,
/// 3 shadow/water, −99 no data).
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};

use landcover_core::band_sum::{self, BandSumResult, SurfaceClass};
use landcover_core::pixels::BORDER_SENTINEL;
use landcover_core::raster::{self, derived_path, CLASS_SUFFIX};
use landcover_core::{ReflectanceScale, BAND_COUNT};

#[derive(Parser, Debug)]
#[command(name = "classify", about = "Band-sum snow/ice, geology and shadow/water classes")]
struct Args {
    /// Directory scanned (non-recursively) for *.tif scenes
    #[arg(long)]
    input_dir: PathBuf,

    /// Unit convention of the input reflectance
    #[arg(long, value_enum)]
    scale: ReflectanceScale,
}

/// (sum, class code) planes; no-data pixels read −99 in both.
fn to_planes(result: &BandSumResult) -> Vec<Vec<f32>> {
    let nodata = f32::from(BORDER_SENTINEL);
    let sums = result
        .sums
        .iter()
        .zip(&result.classes)
        .map(|(&s, c)| if *c == SurfaceClass::NoData { nodata } else { s as f32 })
        .collect();
    let codes = result.codes().into_iter().map(f32::from).collect();
    vec![sums, codes]
}

/// Returns false if the output already existed.
fn classify_scene(input: &Path, scale: ReflectanceScale) -> Result<bool> {
    let output = derived_path(input, CLASS_SUFFIX);
    if output.exists() {
        info!("{} already exists, skipping", output.display());
        return Ok(false);
    }
    let (pixels, meta) = raster::read_raster(input, BAND_COUNT, scale)?;
    let result = band_sum::classify(&pixels);
    raster::write_float_bands(&output, &to_planes(&result), &meta, f64::from(BORDER_SENTINEL))?;
    Ok(true)
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
    let scale = args.scale;
    let scenes = raster::discover(&args.input_dir)
        .with_context(|| format!("Cannot scan {}", args.input_dir.display()))?;

    let mut failed = 0usize;
    for scene in &scenes {
        match raster::probe(scene) {
            Ok(meta) if meta.bands == BAND_COUNT => {}
            Ok(_) => continue,
            Err(e) => {
                error!("{}: {e}", scene.display());
                failed += 1;
                continue;
            }
        }
        match classify_scene(scene, scale) {
            Ok(true) => info!("classified {}", scene.display()),
            Ok(false) => {}
            Err(e) => {
                error!("{}: {e:#}", scene.display());
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} scene(s) failed");
    }
    Ok(())
}
