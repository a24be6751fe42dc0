//! I/O modules for tile metadata, detector footprints and output rasters

pub mod footprint_gml;
pub mod product;
pub mod tile_metadata;

pub use footprint_gml::{footprint_path_for_band, parse_detector_footprints, read_detector_footprints};
pub use product::{AttributeValue, MemorySink, RasterData, RasterSink};
#[cfg(feature = "gdal")]
pub use product::GeoTiffSink;
pub use tile_metadata::{TileMetadata, TileMetadataReader};
