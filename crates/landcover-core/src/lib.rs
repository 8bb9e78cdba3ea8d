//! Land-cover mapping of polar WorldView-2/3 scenes.
//!
//! Reflectance pixels are decomposed into non-negative mixtures of reference
//! spectra (atmosphere, snow, ice, water, rock types), the abundances are
//! thresholded into presence/absence bands, and the result is written as a
//! multi-band GeoTIFF. Radiometric calibration and a band-sum classifier
//! cover the steps before and beside unmixing.

pub mod band_sum;
pub mod error;
pub mod library;
pub mod mask;
pub mod pipeline;
pub mod pixels;
pub mod radiometry;
pub mod raster;
pub mod spectrum;
pub mod stack;
pub mod threshold;
pub mod unmix;

pub use error::{Error, Result};
pub use library::SpectralLibrary;
pub use mask::Mask;
pub use pipeline::config::PipelineConfig;
pub use pipeline::{PipelineOutput, UnmixingPipeline};
pub use pixels::{BorderMask, PixelMatrix, ReflectanceScale};
pub use raster::RasterMeta;
pub use spectrum::{Endmember, BAND_COUNT};
pub use stack::BandStack;
pub use threshold::Threshold;
pub use unmix::{Abundances, UnmixOptions, Unmixer};
