//! s2nbar: Sentinel-2 sun-view geometry and BRDF normalization
//!
//! Rasterizes per-detector footprints, reconstructs dense solar and view
//! angles from the coarse tile metadata grids, and normalizes surface
//! reflectance to nadir view at a reference solar zenith (NBAR), as used
//! when harmonizing Sentinel-2 with Landsat on a 30 m grid.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Band, FocalPlane, TileCanvas, UtmZone, ExitStatus, NbarError, NbarResult,
    AngleImage, DetectorImage, RatioImage, ReflectanceImage,
};

pub use crate::core::{
    AngleReconstructor, FootprintRasterizer, GranuleProcessor, NbarNormalizer, ViewAngleMode,
};
pub use crate::io::{MemorySink, RasterSink, TileMetadataReader};
