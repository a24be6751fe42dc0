//! Core footprint, angle and BRDF processing modules

pub mod angle_interp;
pub mod brdf;
pub mod footprint;
pub mod nbar;
pub mod pipeline;
pub mod solar_position;
pub mod sun_view;

// Re-export main types
pub use angle_interp::{AngleGridLayout, SparseAngleGrid};
pub use brdf::{BrdfCoefficients, BRDF_COEFFICIENTS};
pub use footprint::{DetectorPolygon, FootprintParams, FootprintRasterizer, FootprintSet};
pub use nbar::{NbarNormalizer, NbarOutput, NbarParams, NbarProvenance};
pub use pipeline::{FootprintSource, GranuleConfig, GranuleInputs, GranuleProcessor, GranuleProducts};
pub use solar_position::{ReferenceSolarZenith, ZenithSource};
pub use sun_view::{AngleGridSet, AngleReconstructor, SunViewAngles, ViewAngleGrid, ViewAngleMode, ViewAngles};
