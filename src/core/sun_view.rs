use crate::core::angle_interp::{reconstruct, SparseAngleGrid};
use crate::core::footprint::FootprintSet;
use crate::types::{
    AngleImage, Band, NbarError, NbarResult, TileCanvas, ANGLE_FILL, ANGLE_SCALE, BAND_COUNT,
};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value written to the angle-band table when no band has view angles
pub const NO_ANGLE_BAND: u8 = 255;

/// Source of the view angles applied to each band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewAngleMode {
    /// Each band uses its own detector grids, substituting when wholly missing
    PerBand,
    /// Every band uses the view angles of one reference band
    ReferenceBand(Band),
}

impl Default for ViewAngleMode {
    fn default() -> Self {
        ViewAngleMode::ReferenceBand(Band::B06)
    }
}

/// View zenith/azimuth sample grids of one (band, detector) pair
#[derive(Debug, Clone)]
pub struct ViewAngleGrid {
    pub band: Band,
    pub detector: u8,
    pub zenith: SparseAngleGrid,
    pub azimuth: SparseAngleGrid,
}

/// All sparse angle grids of a granule
#[derive(Debug, Clone)]
pub struct AngleGridSet {
    pub sun_zenith: SparseAngleGrid,
    pub sun_azimuth: SparseAngleGrid,
    pub view: Vec<ViewAngleGrid>,
}

impl AngleGridSet {
    pub fn view_grids(&self, band: Band) -> impl Iterator<Item = &ViewAngleGrid> {
        self.view.iter().filter(move |g| g.band == band)
    }
}

/// Dense view zenith and azimuth of one band
#[derive(Debug, Clone)]
pub struct ViewAngles {
    pub zenith: AngleImage,
    pub azimuth: AngleImage,
}

/// Dense sun and view angles for a granule
#[derive(Debug, Clone)]
pub struct SunViewAngles {
    pub mode: ViewAngleMode,
    pub sun_zenith: AngleImage,
    pub sun_azimuth: AngleImage,
    /// Reconstructed view angles keyed by the band they were built from
    pub view: HashMap<Band, ViewAngles>,
    /// Whether each band's own grids produced any view angle
    pub available: [bool; BAND_COUNT],
    /// Band whose view angles each band uses
    pub substitutes: [Option<Band>; BAND_COUNT],
}

impl SunViewAngles {
    /// View angles to use for `band`, following substitution
    pub fn view_for(&self, band: Band) -> Option<&ViewAngles> {
        self.substitutes[band.index()].and_then(|source| self.view.get(&source))
    }

    pub fn is_available(&self, band: Band) -> bool {
        self.available[band.index()]
    }

    /// Band index whose angles each band uses, `NO_ANGLE_BAND` when none
    pub fn angle_band_table(&self) -> [u8; BAND_COUNT] {
        let mut table = [NO_ANGLE_BAND; BAND_COUNT];
        for (entry, substitute) in table.iter_mut().zip(self.substitutes.iter()) {
            if let Some(band) = substitute {
                *entry = band.index() as u8;
            }
        }
        table
    }

    /// Mean observed solar zenith over valid pixels, in degrees
    pub fn mean_sun_zenith(&self) -> Option<f64> {
        mean_degrees(std::iter::once(&self.sun_zenith))
    }

    pub fn mean_sun_azimuth(&self) -> Option<f64> {
        mean_degrees(std::iter::once(&self.sun_azimuth))
    }

    /// Mean view zenith over every reconstructed view raster
    pub fn mean_view_zenith(&self) -> Option<f64> {
        mean_degrees(self.view.values().map(|v| &v.zenith))
    }

    pub fn mean_view_azimuth(&self) -> Option<f64> {
        mean_degrees(self.view.values().map(|v| &v.azimuth))
    }
}

fn mean_degrees<'a>(images: impl Iterator<Item = &'a AngleImage>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for image in images {
        for &v in image.iter().filter(|&&v| v != ANGLE_FILL) {
            sum += f64::from(v);
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64 / ANGLE_SCALE)
    }
}

/// Reconstruct a zenith grid and its azimuth grid, concurrently when the
/// `parallel` feature is enabled
fn reconstruct_pair(
    zenith: &SparseAngleGrid,
    azimuth: &SparseAngleGrid,
    canvas: &TileCanvas,
) -> (Option<AngleImage>, Option<AngleImage>) {
    #[cfg(feature = "parallel")]
    {
        rayon::join(|| reconstruct(zenith, canvas), || reconstruct(azimuth, canvas))
    }
    #[cfg(not(feature = "parallel"))]
    {
        (reconstruct(zenith, canvas), reconstruct(azimuth, canvas))
    }
}

/// First band with view angles for `band`: itself, then its own focal
/// plane in band order, then the other focal plane.
pub fn find_substitute(band: Band, available: &[bool; BAND_COUNT]) -> Option<Band> {
    if available[band.index()] {
        return Some(band);
    }
    let plane = band.focal_plane();
    plane
        .bands()
        .chain(plane.other().bands())
        .find(|b| available[b.index()])
}

/// Substitute table for every band
pub fn find_substitutes(available: &[bool; BAND_COUNT]) -> [Option<Band>; BAND_COUNT] {
    let mut substitutes = [None; BAND_COUNT];
    for band in Band::ALL {
        substitutes[band.index()] = find_substitute(band, available);
    }
    substitutes
}

/// Builds dense sun/view angle rasters from sparse grids and footprints
pub struct AngleReconstructor {
    mode: ViewAngleMode,
}

impl AngleReconstructor {
    pub fn new(mode: ViewAngleMode) -> Self {
        Self { mode }
    }

    pub fn standard() -> Self {
        Self::new(ViewAngleMode::default())
    }

    pub fn mode(&self) -> ViewAngleMode {
        self.mode
    }

    pub fn reconstruct(
        &self,
        grids: &AngleGridSet,
        footprints: &FootprintSet,
        canvas: &TileCanvas,
    ) -> NbarResult<SunViewAngles> {
        log::info!("Reconstructing sun/view angles ({:?})", self.mode);

        let (sun_zenith, sun_azimuth) = reconstruct_pair(&grids.sun_zenith, &grids.sun_azimuth, canvas);
        let sun_zenith = sun_zenith.ok_or_else(|| {
            NbarError::MissingData("solar zenith grid has no valid sample".to_string())
        })?;
        let sun_azimuth = sun_azimuth.ok_or_else(|| {
            NbarError::MissingData("solar azimuth grid has no valid sample".to_string())
        })?;

        let bands: Vec<Band> = match self.mode {
            ViewAngleMode::PerBand => Band::ALL.to_vec(),
            ViewAngleMode::ReferenceBand(band) => vec![band],
        };

        let mut view = HashMap::new();
        let mut available = [false; BAND_COUNT];
        for band in bands {
            let footprint = match footprints.for_band(band) {
                Some(f) => f,
                None => {
                    log::warn!("No detector footprint for {}; view angles unavailable", band);
                    continue;
                }
            };
            canvas.check_shape(&format!("{} detector footprint", band), footprint.dim())?;

            if let Some(angles) = self.reconstruct_band(grids, band, footprint, canvas) {
                available[band.index()] = true;
                view.insert(band, angles);
            } else {
                log::warn!("{} has no usable view angle grid", band);
            }
        }

        let substitutes = match self.mode {
            ViewAngleMode::PerBand => find_substitutes(&available),
            ViewAngleMode::ReferenceBand(reference) => {
                let source = if available[reference.index()] {
                    Some(reference)
                } else {
                    None
                };
                [source; BAND_COUNT]
            }
        };
        for band in Band::ALL {
            match substitutes[band.index()] {
                Some(source) if source != band && self.mode == ViewAngleMode::PerBand => {
                    log::info!("{} uses view angles of {}", band, source)
                }
                None => log::warn!("No view angles available for {}", band),
                _ => {}
            }
        }

        Ok(SunViewAngles {
            mode: self.mode,
            sun_zenith,
            sun_azimuth,
            view,
            available,
            substitutes,
        })
    }

    /// Reconstruct and cookie-cut every detector of one band
    fn reconstruct_band(
        &self,
        grids: &AngleGridSet,
        band: Band,
        footprint: &Array2<u8>,
        canvas: &TileCanvas,
    ) -> Option<ViewAngles> {
        let mut zenith = Array2::from_elem(canvas.shape(), ANGLE_FILL);
        let mut azimuth = Array2::from_elem(canvas.shape(), ANGLE_FILL);
        let mut detectors = 0;

        for grid in grids.view_grids(band) {
            let (dense_zenith, dense_azimuth) = match reconstruct_pair(&grid.zenith, &grid.azimuth, canvas) {
                (Some(z), Some(a)) => (z, a),
                _ => {
                    log::debug!("{} detector {} has no valid view samples", band, grid.detector);
                    continue;
                }
            };

            let detector = grid.detector;
            Zip::from(&mut zenith)
                .and(&mut azimuth)
                .and(footprint)
                .and(&dense_zenith)
                .and(&dense_azimuth)
                .for_each(|z, a, &id, &dz, &da| {
                    if id == detector {
                        *z = dz;
                        *a = da;
                    }
                });
            detectors += 1;
        }

        log::debug!("{}: view angles from {} detectors", band, detectors);
        if detectors == 0 {
            None
        } else {
            Some(ViewAngles { zenith, azimuth })
        }
    }
}
