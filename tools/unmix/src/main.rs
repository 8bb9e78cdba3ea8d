/// Batch endmember unmixing: every 8-band reflectance scene in a directory is
/// run through the multi-round pipeline and written next to the input as
/// `<stem>_endmember.tif`. Scenes whose output already exists are skipped.
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use rayon::prelude::*;

use landcover_core::raster::{self, derived_path, ENDMEMBER_SUFFIX};
use landcover_core::{
    PipelineConfig, ReflectanceScale, SpectralLibrary, UnmixingPipeline, BAND_COUNT,
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "unmix",
    about = "Spectral endmember unmixing of WorldView-2/3 reflectance scenes"
)]
struct Args {
    /// Directory scanned (non-recursively) for *.tif scenes
    #[arg(long)]
    input_dir: PathBuf,

    /// Spectral library table; needed by `sample` and `median` endmember sources
    #[arg(long)]
    library: Option<PathBuf>,

    /// Pipeline configuration JSON (omit for the built-in polar defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unit convention of the input reflectance
    #[arg(long, value_enum)]
    scale: ReflectanceScale,

    /// Scenes processed concurrently
    #[arg(long, default_value = "1")]
    jobs: usize,
}

// ── Per-scene processing ─────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Written(PathBuf),
    Skipped(PathBuf),
}

fn process_scene(
    input: &Path,
    pipeline: &UnmixingPipeline,
    scale: ReflectanceScale,
) -> Result<Outcome> {
    let output = derived_path(input, ENDMEMBER_SUFFIX);
    if output.exists() {
        info!("{} already exists, skipping", output.display());
        return Ok(Outcome::Skipped(output));
    }
    info!("unmixing {}", input.display());
    let (pixels, meta) = raster::read_raster(input, BAND_COUNT, scale)?;
    let result = pipeline.run(&pixels)?;
    raster::write_stack(&output, &result.stack, &result.border, &meta)?;
    Ok(Outcome::Written(output))
}

/// Scenes in `dir` that carry exactly eight bands.
fn eight_band_scenes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut scenes = Vec::new();
    for path in raster::discover(dir)? {
        match raster::probe(&path) {
            Ok(meta) if meta.bands == BAND_COUNT => scenes.push(path),
            Ok(meta) => info!("{}: {} band(s), not a scene", path.display(), meta.bands),
            Err(e) => warn!("{}: cannot inspect ({e}), skipping", path.display()),
        }
    }
    Ok(scenes)
}

fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    builder.format_timestamp_secs();
    builder.init();
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Cannot load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let library = args
        .library
        .as_ref()
        .map(|path| {
            SpectralLibrary::load(path)
                .with_context(|| format!("Cannot load library {}", path.display()))
        })
        .transpose()?;
    let pipeline = UnmixingPipeline::new(config, library.as_ref())
        .context("Invalid pipeline configuration")?;

    let scenes = eight_band_scenes(&args.input_dir)?;
    info!("{} scene(s) in {}", scenes.len(), args.input_dir.display());

    let scale = args.scale;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.max(1))
        .build()
        .context("Cannot start worker pool")?;
    let results: Vec<(PathBuf, Result<Outcome>)> = pool.install(|| {
        scenes
            .par_iter()
            .map(|scene| (scene.clone(), process_scene(scene, &pipeline, scale)))
            .collect()
    });

    let mut failed = 0usize;
    let mut written = 0usize;
    for (scene, result) in &results {
        match result {
            Ok(Outcome::Written(_)) => written += 1,
            Ok(Outcome::Skipped(_)) => {}
            Err(e) => {
                error!("{}: {e:#}", scene.display());
                failed += 1;
            }
        }
    }
    info!("{written} written, {} skipped, {failed} failed", results.len() - written - failed);

    if failed > 0 {
        bail!("{failed} of {} scene(s) failed", results.len());
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
