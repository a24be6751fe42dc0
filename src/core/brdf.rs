//! RossThick-LiSparseReciprocal BRDF kernel model.
//!
//! Angles are in degrees: solar zenith, view zenith and relative azimuth
//! (view minus solar).

use crate::types::{Band, BAND_COUNT};
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

/// Crown shape ratio b/r of the LiSparse kernel
const BR: f64 = 1.0;
/// Crown height ratio h/b of the LiSparse kernel
const HB: f64 = 2.0;

/// Volumetric scattering kernel (RossThick)
pub fn ross_thick(sun_zenith: f64, view_zenith: f64, relative_azimuth: f64) -> f64 {
    let sz = sun_zenith.to_radians();
    let vz = view_zenith.to_radians();
    let ra = relative_azimuth.to_radians();

    let cos_xi = phase_cosine(sz, vz, ra);
    let xi = cos_xi.acos();
    ((FRAC_PI_2 - xi) * cos_xi + xi.sin()) / (sz.cos() + vz.cos()) - FRAC_PI_4
}

/// Geometric-optical shadowing kernel (LiSparse, reciprocal form)
pub fn li_sparse_r(sun_zenith: f64, view_zenith: f64, relative_azimuth: f64) -> f64 {
    let ra = relative_azimuth.to_radians();
    // equivalent zeniths for non-spherical crowns
    let sz = (BR * sun_zenith.to_radians().tan()).atan();
    let vz = (BR * view_zenith.to_radians().tan()).atan();

    let (tan_s, tan_v) = (sz.tan(), vz.tan());
    let (sec_s, sec_v) = (1.0 / sz.cos(), 1.0 / vz.cos());
    let sec_sum = sec_s + sec_v;

    let cos_xi = phase_cosine(sz, vz, ra);
    let distance_sq = tan_s * tan_s + tan_v * tan_v - 2.0 * tan_s * tan_v * ra.cos();
    let cross = tan_s * tan_v * ra.sin();
    let cos_t = (HB * (distance_sq + cross * cross).sqrt() / sec_sum).clamp(-1.0, 1.0);
    let t = cos_t.acos();

    let overlap = (t - t.sin() * cos_t) * sec_sum / PI;
    overlap - sec_sum + 0.5 * (1.0 + cos_xi) * sec_s * sec_v
}

fn phase_cosine(sz: f64, vz: f64, ra: f64) -> f64 {
    (sz.cos() * vz.cos() + sz.sin() * vz.sin() * ra.cos()).clamp(-1.0, 1.0)
}

/// Isotropic, volumetric and geometric weights of one spectral band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrdfCoefficients {
    pub f_iso: f64,
    pub f_vol: f64,
    pub f_geo: f64,
}

impl BrdfCoefficients {
    pub const fn new(f_iso: f64, f_vol: f64, f_geo: f64) -> Self {
        Self { f_iso, f_vol, f_geo }
    }

    /// Modelled reflectance for the given geometry
    pub fn reflectance(&self, sun_zenith: f64, view_zenith: f64, relative_azimuth: f64) -> f64 {
        self.f_iso
            + self.f_vol * ross_thick(sun_zenith, view_zenith, relative_azimuth)
            + self.f_geo * li_sparse_r(sun_zenith, view_zenith, relative_azimuth)
    }
}

/// Global MODIS-derived coefficients: blue, green, red, red-edge 1-3,
/// NIR, SWIR1, SWIR2.
pub const BRDF_COEFFICIENTS: [BrdfCoefficients; 9] = [
    BrdfCoefficients::new(0.0774, 0.0079, 0.0372),
    BrdfCoefficients::new(0.1306, 0.0178, 0.0580),
    BrdfCoefficients::new(0.1690, 0.0227, 0.0574),
    BrdfCoefficients::new(0.2085, 0.0256, 0.0845),
    BrdfCoefficients::new(0.2316, 0.0273, 0.1003),
    BrdfCoefficients::new(0.2599, 0.0294, 0.1197),
    BrdfCoefficients::new(0.3093, 0.0330, 0.1535),
    BrdfCoefficients::new(0.3430, 0.0453, 0.1154),
    BrdfCoefficients::new(0.2658, 0.0387, 0.0639),
];

/// Row of `BRDF_COEFFICIENTS` for each band; water vapour and cirrus have none
const COEFFICIENT_INDEX: [Option<usize>; BAND_COUNT] = [
    Some(0), // B01
    Some(0), // B02
    Some(1), // B03
    Some(2), // B04
    Some(3), // B05
    Some(4), // B06
    Some(5), // B07
    Some(6), // B08
    Some(6), // B8A
    None,    // B09
    None,    // B10
    Some(7), // B11
    Some(8), // B12
];

/// Coefficients for `band`, `None` when the band is not normalized
pub fn coefficients_for(band: Band) -> Option<&'static BrdfCoefficients> {
    COEFFICIENT_INDEX[band.index()].map(|i| &BRDF_COEFFICIENTS[i])
}
