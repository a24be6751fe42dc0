use crate::core::angle_interp::{to_fixed, SparseAngleGrid};
use crate::core::sun_view::{AngleGridSet, ViewAngleGrid};
use crate::types::{
    Band, NbarError, NbarResult, TileCanvas, UtmZone, ANGLE_FILL, DETECTOR_COUNT,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::path::Path;

/// Resolution (m) whose size and geoposition define the tile extent
const REFERENCE_RESOLUTION: u32 = 10;

/// Sentinel-2 granule tile metadata (MTD_TL.xml), root element content
#[derive(Debug, Deserialize)]
pub struct TileMetadataXml {
    #[serde(rename = "General_Info", alias = "n1:General_Info")]
    pub general_info: GeneralInfo,
    #[serde(rename = "Geometric_Info", alias = "n1:Geometric_Info")]
    pub geometric_info: GeometricInfo,
}

#[derive(Debug, Deserialize)]
pub struct GeneralInfo {
    #[serde(rename = "SENSING_TIME")]
    pub sensing_time: TextNode,
}

#[derive(Debug, Deserialize)]
pub struct GeometricInfo {
    #[serde(rename = "Tile_Geocoding")]
    pub tile_geocoding: TileGeocoding,
    #[serde(rename = "Tile_Angles")]
    pub tile_angles: TileAngles,
}

#[derive(Debug, Deserialize)]
pub struct TileGeocoding {
    #[serde(rename = "HORIZONTAL_CS_NAME")]
    pub horizontal_cs_name: String,
    #[serde(rename = "Size", default)]
    pub sizes: Vec<SizeXml>,
    #[serde(rename = "Geoposition", default)]
    pub geopositions: Vec<GeopositionXml>,
}

#[derive(Debug, Deserialize)]
pub struct SizeXml {
    #[serde(rename = "@resolution")]
    pub resolution: u32,
    #[serde(rename = "NROWS")]
    pub nrows: usize,
    #[serde(rename = "NCOLS")]
    pub ncols: usize,
}

#[derive(Debug, Deserialize)]
pub struct GeopositionXml {
    #[serde(rename = "@resolution")]
    pub resolution: u32,
    #[serde(rename = "ULX")]
    pub ulx: f64,
    #[serde(rename = "ULY")]
    pub uly: f64,
}

#[derive(Debug, Deserialize)]
pub struct TileAngles {
    #[serde(rename = "Sun_Angles_Grid")]
    pub sun_angles_grid: AnglePairXml,
    #[serde(rename = "Viewing_Incidence_Angles_Grids", default)]
    pub viewing_grids: Vec<ViewingGridXml>,
}

#[derive(Debug, Deserialize)]
pub struct AnglePairXml {
    #[serde(rename = "Zenith")]
    pub zenith: AngleGridXml,
    #[serde(rename = "Azimuth")]
    pub azimuth: AngleGridXml,
}

#[derive(Debug, Deserialize)]
pub struct ViewingGridXml {
    #[serde(rename = "@bandId")]
    pub band_id: usize,
    #[serde(rename = "@detectorId")]
    pub detector_id: u8,
    #[serde(rename = "Zenith")]
    pub zenith: AngleGridXml,
    #[serde(rename = "Azimuth")]
    pub azimuth: AngleGridXml,
}

#[derive(Debug, Deserialize)]
pub struct AngleGridXml {
    #[serde(rename = "COL_STEP")]
    pub col_step: TextNode,
    #[serde(rename = "ROW_STEP")]
    pub row_step: TextNode,
    #[serde(rename = "Values_List")]
    pub values_list: ValuesListXml,
}

#[derive(Debug, Deserialize)]
pub struct ValuesListXml {
    #[serde(rename = "VALUES", default)]
    pub rows: Vec<String>,
}

/// Element whose attributes are ignored and whose text is kept
#[derive(Debug, Deserialize)]
pub struct TextNode {
    #[serde(rename = "$text", default)]
    pub value: String,
}

/// Geometry, sensing time and angle grids of one granule
#[derive(Debug, Clone)]
pub struct TileMetadata {
    /// Tile canvas at the working pixel size
    pub canvas: TileCanvas,
    pub sensing_time: DateTime<Utc>,
    pub angle_grids: AngleGridSet,
}

/// Reader for Sentinel-2 tile metadata
pub struct TileMetadataReader;

impl TileMetadataReader {
    /// Read and parse a tile metadata file
    pub fn read<P: AsRef<Path>>(path: P, pixel_size: f64) -> NbarResult<TileMetadata> {
        log::info!("Reading tile metadata: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content, pixel_size)
    }

    /// Parse tile metadata, placing the canvas at `pixel_size`.
    ///
    /// Any deviation from the expected element structure is an
    /// `InvalidFormat` error.
    pub fn parse(xml_content: &str, pixel_size: f64) -> NbarResult<TileMetadata> {
        log::debug!("Parsing tile metadata XML ({} bytes)", xml_content.len());
        let root = from_str::<TileMetadataXml>(xml_content).map_err(|e| {
            NbarError::InvalidFormat(format!("Unexpected tile metadata structure: {}", e))
        })?;

        let canvas = Self::extract_canvas(&root.geometric_info.tile_geocoding, pixel_size)?;
        let sensing_time = Self::parse_sensing_time(&root.general_info.sensing_time.value)?;
        let angle_grids = Self::extract_angle_grids(&root.geometric_info.tile_angles)?;

        log::info!(
            "Tile {}x{} at {} m, zone {}, sensed {}, {} view grids",
            canvas.size,
            canvas.size,
            canvas.pixel_size,
            canvas.zone,
            sensing_time,
            angle_grids.view.len()
        );
        Ok(TileMetadata {
            canvas,
            sensing_time,
            angle_grids,
        })
    }

    fn parse_sensing_time(text: &str) -> NbarResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| NbarError::InvalidFormat(format!("Bad SENSING_TIME '{}': {}", text, e)))
    }

    /// Tile canvas from the 10 m size and geoposition
    pub fn extract_canvas(geocoding: &TileGeocoding, pixel_size: f64) -> NbarResult<TileCanvas> {
        let zone = UtmZone::parse(&geocoding.horizontal_cs_name)?;
        let size = geocoding
            .sizes
            .iter()
            .find(|s| s.resolution == REFERENCE_RESOLUTION)
            .ok_or_else(|| {
                NbarError::InvalidFormat(format!(
                    "No Size element at resolution {}",
                    REFERENCE_RESOLUTION
                ))
            })?;
        let position = geocoding
            .geopositions
            .iter()
            .find(|g| g.resolution == REFERENCE_RESOLUTION)
            .ok_or_else(|| {
                NbarError::InvalidFormat(format!(
                    "No Geoposition element at resolution {}",
                    REFERENCE_RESOLUTION
                ))
            })?;

        if size.nrows != size.ncols {
            return Err(NbarError::InvalidFormat(format!(
                "Tile is not square: {} x {}",
                size.nrows, size.ncols
            )));
        }
        let extent = size.nrows as f64 * f64::from(REFERENCE_RESOLUTION);
        let pixels = (extent / pixel_size).round() as usize;

        Ok(TileCanvas::new(pixels, pixel_size, position.ulx, position.uly, zone))
    }

    /// Convert every grid in `Tile_Angles`
    pub fn extract_angle_grids(angles: &TileAngles) -> NbarResult<AngleGridSet> {
        let sun = &angles.sun_angles_grid;
        let sun_zenith = Self::convert_grid(&sun.zenith, "Sun zenith")?;
        let sun_azimuth = Self::convert_grid(&sun.azimuth, "Sun azimuth")?;

        let mut view = Vec::with_capacity(angles.viewing_grids.len());
        for grid in &angles.viewing_grids {
            let band = Band::from_index(grid.band_id).ok_or_else(|| {
                NbarError::InvalidFormat(format!("bandId {} out of range", grid.band_id))
            })?;
            if grid.detector_id == 0 || grid.detector_id > DETECTOR_COUNT {
                return Err(NbarError::InvalidFormat(format!(
                    "detectorId {} out of range",
                    grid.detector_id
                )));
            }
            let label = format!("{} detector {}", band, grid.detector_id);
            view.push(ViewAngleGrid {
                band,
                detector: grid.detector_id,
                zenith: Self::convert_grid(&grid.zenith, &format!("{} view zenith", label))?,
                azimuth: Self::convert_grid(&grid.azimuth, &format!("{} view azimuth", label))?,
            });
        }

        Ok(AngleGridSet {
            sun_zenith,
            sun_azimuth,
            view,
        })
    }

    /// Textual grid to fixed-point samples; `NaN` marks a missing sample
    fn convert_grid(grid: &AngleGridXml, what: &str) -> NbarResult<SparseAngleGrid> {
        let col_step = parse_number(&grid.col_step.value, what)?;
        let row_step = parse_number(&grid.row_step.value, what)?;

        let mut values: Vec<u16> = Vec::new();
        let mut width = None;
        for row in &grid.values_list.rows {
            let mut count = 0;
            for token in row.split_whitespace() {
                let value = parse_number(token, what)?;
                values.push(if value.is_nan() { ANGLE_FILL } else { to_fixed(value) });
                count += 1;
            }
            match width {
                None => width = Some(count),
                Some(w) if w != count => {
                    return Err(NbarError::InvalidFormat(format!(
                        "{}: ragged Values_List ({} and {} values)",
                        what, w, count
                    )))
                }
                _ => {}
            }
        }

        let rows = grid.values_list.rows.len();
        let cols = width.unwrap_or(0);
        let values = Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| NbarError::Processing(format!("{}: {}", what, e)))?;

        let angle_grid = SparseAngleGrid::new(values, row_step, col_step);
        if !angle_grid.is_available() {
            log::debug!("{}: no valid samples", what);
        }
        Ok(angle_grid)
    }
}

fn parse_number(text: &str, what: &str) -> NbarResult<f64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        return Ok(f64::NAN);
    }
    text.parse::<f64>()
        .map_err(|_| NbarError::InvalidFormat(format!("{}: cannot parse '{}'", what, text)))
}
