use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Detector-ID value meaning "no detector claims this pixel"
pub const DETECTOR_FILL: u8 = 0;

/// Number of MSI detector modules across the swath (IDs 1..=12)
pub const DETECTOR_COUNT: u8 = 12;

/// Fill value for angles stored in hundredths of a degree
pub const ANGLE_FILL: u16 = 40000;

/// Fixed-point scale of stored angles (value / 100 = degrees)
pub const ANGLE_SCALE: f64 = 100.0;

/// Fill value of scaled surface reflectance
pub const REFLECTANCE_FILL: i16 = -9999;

/// Fill value of the BRDF c-factor (ratio) raster
pub const CFACTOR_FILL: f32 = -1000.0;

/// Working pixel size of the harmonized grid in meters
pub const HLS_PIXEL_SIZE: f64 = 30.0;

/// Per-pixel detector IDs (one raster per band, or one shared)
pub type DetectorImage = Array2<u8>;

/// Angle raster in hundredths of a degree
pub type AngleImage = Array2<u16>;

/// Scaled surface reflectance
pub type ReflectanceImage = Array2<i16>;

/// Per-pixel BRDF normalization ratio
pub type RatioImage = Array2<f32>;

/// Sentinel-2 MSI spectral bands in wavelength order.
///
/// The discriminant is the 0-based `bandId` used by the granule metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    B01,
    B02,
    B03,
    B04,
    B05,
    B06,
    B07,
    B08,
    B8A,
    B09,
    B10,
    B11,
    B12,
}

/// Number of MSI spectral bands
pub const BAND_COUNT: usize = 13;

impl Band {
    pub const ALL: [Band; BAND_COUNT] = [
        Band::B01,
        Band::B02,
        Band::B03,
        Band::B04,
        Band::B05,
        Band::B06,
        Band::B07,
        Band::B08,
        Band::B8A,
        Band::B09,
        Band::B10,
        Band::B11,
        Band::B12,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Band> {
        Band::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::B01 => "B01",
            Band::B02 => "B02",
            Band::B03 => "B03",
            Band::B04 => "B04",
            Band::B05 => "B05",
            Band::B06 => "B06",
            Band::B07 => "B07",
            Band::B08 => "B08",
            Band::B8A => "B8A",
            Band::B09 => "B09",
            Band::B10 => "B10",
            Band::B11 => "B11",
            Band::B12 => "B12",
        }
    }

    /// Parse a band name such as `B8A`, `b04` or `B4`
    pub fn from_name(name: &str) -> Option<Band> {
        let upper = name.trim().to_uppercase();
        if upper == "B8A" {
            return Some(Band::B8A);
        }
        let number: usize = upper.strip_prefix('B')?.parse().ok()?;
        match number {
            1..=8 => Band::from_index(number - 1),
            9..=12 => Band::from_index(number),
            _ => None,
        }
    }

    /// Focal plane the band is imaged on
    pub fn focal_plane(self) -> FocalPlane {
        match self {
            Band::B10 | Band::B11 | Band::B12 => FocalPlane::Swir,
            _ => FocalPlane::Vnir,
        }
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// MSI focal planes; bands sharing one see near-identical viewing geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocalPlane {
    /// Visible and near-infrared (B01..B09, B8A)
    Vnir,
    /// Short-wave infrared (B10..B12)
    Swir,
}

impl FocalPlane {
    pub fn bands(self) -> impl Iterator<Item = Band> {
        Band::ALL.into_iter().filter(move |b| b.focal_plane() == self)
    }

    pub fn other(self) -> FocalPlane {
        match self {
            FocalPlane::Vnir => FocalPlane::Swir,
            FocalPlane::Swir => FocalPlane::Vnir,
        }
    }
}

/// UTM zone with hemisphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmZone {
    pub zone: u8,
    pub north: bool,
}

impl UtmZone {
    pub fn new(zone: u8, north: bool) -> Self {
        Self { zone, north }
    }

    /// Parse `"WGS84 / UTM zone 31N"`, `"31N"` or `"31 S"`
    pub fn parse(text: &str) -> NbarResult<Self> {
        let re = Regex::new(r"(\d{1,2})\s*([NSns])\s*$")
            .map_err(|e| NbarError::Processing(format!("Invalid zone pattern: {}", e)))?;
        let caps = re.captures(text.trim()).ok_or_else(|| {
            NbarError::InvalidFormat(format!("Cannot parse UTM zone from '{}'", text))
        })?;
        let zone: u8 = caps[1]
            .parse()
            .map_err(|_| NbarError::InvalidFormat(format!("Invalid UTM zone in '{}'", text)))?;
        if !(1..=60).contains(&zone) {
            return Err(NbarError::InvalidFormat(format!("UTM zone {} out of range", zone)));
        }
        let north = caps[2].eq_ignore_ascii_case("N");
        Ok(Self { zone, north })
    }

    /// Central meridian in degrees
    pub fn central_meridian(&self) -> f64 {
        f64::from(self.zone) * 6.0 - 183.0
    }
}

impl std::fmt::Display for UtmZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.zone, if self.north { 'N' } else { 'S' })
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }
}

/// Square raster descriptor shared by every raster of one granule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileCanvas {
    /// Rows and columns (equal)
    pub size: usize,
    /// Pixel size in meters
    pub pixel_size: f64,
    /// Upper-left corner easting
    pub ulx: f64,
    /// Upper-left corner northing
    pub uly: f64,
    pub zone: UtmZone,
}

impl TileCanvas {
    pub fn new(size: usize, pixel_size: f64, ulx: f64, uly: f64, zone: UtmZone) -> Self {
        Self {
            size,
            pixel_size,
            ulx,
            uly,
            zone,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.size, self.size)
    }

    /// Northing of a row's pixel centers
    pub fn row_center_y(&self, row: usize) -> f64 {
        self.uly - (row as f64 + 0.5) * self.pixel_size
    }

    /// Easting of a column's pixel centers
    pub fn col_center_x(&self, col: usize) -> f64 {
        self.ulx + (col as f64 + 0.5) * self.pixel_size
    }

    /// Projected coordinate of the tile center
    pub fn center(&self) -> (f64, f64) {
        let half = self.size as f64 / 2.0 * self.pixel_size;
        (self.ulx + half, self.uly - half)
    }

    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform {
            top_left_x: self.ulx,
            pixel_width: self.pixel_size,
            rotation_x: 0.0,
            top_left_y: self.uly,
            rotation_y: 0.0,
            pixel_height: -self.pixel_size,
        }
    }

    /// Check that a raster lies on this canvas
    pub fn check_shape(&self, what: &str, shape: (usize, usize)) -> NbarResult<()> {
        if shape != self.shape() {
            return Err(NbarError::DimensionMismatch {
                what: what.to_string(),
                expected: self.shape(),
                found: shape,
            });
        }
        Ok(())
    }
}

/// Status reported to the driver for one granule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    Success,
    /// Abort the whole pipeline
    Fatal,
    /// Produce nothing for this granule, but keep going
    SkipGranule,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::SkipGranule => 100,
        }
    }
}

/// Error types for angle reconstruction and NBAR processing
#[derive(Debug, thiserror::Error)]
pub enum NbarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("{what}: expected {expected:?} pixels, found {found:?}")]
    DimensionMismatch {
        what: String,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Detector footprint vector not found for band {band} in {source_name}")]
    FootprintVectorNotFound { band: String, source_name: String },

    #[error("Missing data: {0}")]
    MissingData(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl NbarError {
    /// Classify the error for the driver
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            NbarError::FootprintVectorNotFound { .. } | NbarError::MissingData(_) => {
                ExitStatus::SkipGranule
            }
            _ => ExitStatus::Fatal,
        }
    }
}

/// Result type for NBAR processing
pub type NbarResult<T> = Result<T, NbarError>;
