use crate::core::brdf::coefficients_for;
use crate::core::solar_position::{reference_solar_zenith, ReferenceSolarZenith};
use crate::core::sun_view::SunViewAngles;
use crate::types::{
    Band, NbarError, NbarResult, RatioImage, ReflectanceImage, TileCanvas, ANGLE_FILL, ANGLE_SCALE,
    BAND_COUNT, CFACTOR_FILL, REFLECTANCE_FILL,
};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Parameters for NBAR normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbarParams {
    /// Poleward of this latitude (degrees) the reference solar zenith is the
    /// mean observed solar zenith instead of the overpass model
    pub high_latitude_limit_deg: f64,
}

impl Default for NbarParams {
    fn default() -> Self {
        Self {
            high_latitude_limit_deg: 81.3,
        }
    }
}

/// Attributes describing how a granule was normalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbarProvenance {
    pub reference_solar_zenith: ReferenceSolarZenith,
    pub mean_sun_zenith: Option<f64>,
    pub mean_sun_azimuth: Option<f64>,
    pub mean_view_zenith: Option<f64>,
    pub mean_view_azimuth: Option<f64>,
    /// Band index supplying each band's view angles (255 = none)
    pub angle_band: [u8; BAND_COUNT],
    /// Whether each band's own view grids were usable
    pub angle_available: [bool; BAND_COUNT],
    pub corrected_bands: Vec<Band>,
}

/// Output of normalizing a granule
#[derive(Debug, Clone)]
pub struct NbarOutput {
    /// c-factor raster per normalized band
    pub cfactor: BTreeMap<Band, RatioImage>,
    pub provenance: NbarProvenance,
}

/// Round half up and saturate to the signed 16-bit range
pub fn round_to_i16(value: f64) -> i16 {
    (value + 0.5)
        .floor()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Normalizes reflectance to nadir view and a reference solar zenith
pub struct NbarNormalizer {
    params: NbarParams,
}

impl NbarNormalizer {
    pub fn new(params: NbarParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(NbarParams::default())
    }

    /// Reference solar zenith for the tile, falling back to the observed mean
    /// at high latitude
    pub fn reference_zenith(
        &self,
        canvas: &TileCanvas,
        sensing_time: DateTime<Utc>,
        angles: &SunViewAngles,
    ) -> NbarResult<ReferenceSolarZenith> {
        reference_solar_zenith(
            canvas,
            sensing_time,
            angles.mean_sun_zenith(),
            self.params.high_latitude_limit_deg,
        )
    }

    /// Normalize one band in place.
    ///
    /// Returns `None` for bands without BRDF coefficients, otherwise the
    /// c-factor raster (fill where no correction was applied).
    pub fn normalize_band(
        &self,
        band: Band,
        reflectance: &mut ReflectanceImage,
        angles: &SunViewAngles,
        reference_zenith: f64,
    ) -> NbarResult<Option<RatioImage>> {
        let coefficients = match coefficients_for(band) {
            Some(c) => c,
            None => {
                log::debug!("{} has no BRDF coefficients; left unchanged", band);
                return Ok(None);
            }
        };
        let shape = angles.sun_zenith.dim();
        if reflectance.dim() != shape {
            return Err(NbarError::DimensionMismatch {
                what: format!("{} reflectance", band),
                expected: shape,
                found: reflectance.dim(),
            });
        }

        let mut ratio = Array2::from_elem(shape, CFACTOR_FILL);
        let view = match angles.view_for(band) {
            Some(v) => v,
            None => {
                log::warn!("{} has no view angles; reflectance left uncorrected", band);
                return Ok(Some(ratio));
            }
        };

        let nadir = coefficients.reflectance(reference_zenith, 0.0, 0.0);
        let correct = |r: &mut i16, q: &mut f32, &sz: &u16, &sa: &u16, &vz: &u16, &va: &u16| {
            if *r == REFLECTANCE_FILL
                || sz == ANGLE_FILL
                || sa == ANGLE_FILL
                || vz == ANGLE_FILL
                || va == ANGLE_FILL
            {
                return;
            }
            let relative_azimuth = (f64::from(va) - f64::from(sa)) / ANGLE_SCALE;
            let observed = coefficients.reflectance(
                f64::from(sz) / ANGLE_SCALE,
                f64::from(vz) / ANGLE_SCALE,
                relative_azimuth,
            );
            let c = nadir / observed;
            if !c.is_finite() {
                return;
            }
            *r = round_to_i16(f64::from(*r) * c);
            *q = c as f32;
        };

        let zip = Zip::from(reflectance)
            .and(&mut ratio)
            .and(&angles.sun_zenith)
            .and(&angles.sun_azimuth)
            .and(&view.zenith)
            .and(&view.azimuth);
        #[cfg(feature = "parallel")]
        zip.par_for_each(correct);
        #[cfg(not(feature = "parallel"))]
        zip.for_each(correct);

        let corrected = ratio.iter().filter(|&&q| q != CFACTOR_FILL).count();
        log::info!("{}: normalized {} pixels", band, corrected);
        Ok(Some(ratio))
    }

    /// Normalize every band present in `reflectance`
    pub fn normalize(
        &self,
        reflectance: &mut HashMap<Band, ReflectanceImage>,
        angles: &SunViewAngles,
        reference: ReferenceSolarZenith,
    ) -> NbarResult<NbarOutput> {
        let mut cfactor = BTreeMap::new();
        let mut corrected_bands = Vec::new();

        for band in Band::ALL {
            let image = match reflectance.get_mut(&band) {
                Some(image) => image,
                None => continue,
            };
            if let Some(ratio) = self.normalize_band(band, image, angles, reference.degrees)? {
                if angles.view_for(band).is_some() {
                    corrected_bands.push(band);
                }
                cfactor.insert(band, ratio);
            }
        }

        let provenance = NbarProvenance {
            reference_solar_zenith: reference,
            mean_sun_zenith: angles.mean_sun_zenith(),
            mean_sun_azimuth: angles.mean_sun_azimuth(),
            mean_view_zenith: angles.mean_view_zenith(),
            mean_view_azimuth: angles.mean_view_azimuth(),
            angle_band: angles.angle_band_table(),
            angle_available: angles.available,
            corrected_bands,
        };
        Ok(NbarOutput {
            cfactor,
            provenance,
        })
    }
}
