use crate::types::{NbarError, NbarResult, TileCanvas, UtmZone};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in km
const EARTH_MEAN_RADIUS_KM: f64 = 6371.01;
/// Astronomical unit in km
const ASTRONOMICAL_UNIT_KM: f64 = 149_597_890.0;
/// 2000-01-01T12:00:00Z
const J2000_UNIX_MILLIS: i64 = 946_728_000_000;

/// Sun position seen from the ground, in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    pub zenith: f64,
    /// Clockwise from north, 0..360
    pub azimuth: f64,
}

/// Solar position at a UTC instant (PSA algorithm), with parallax correction
pub fn solar_position(time: DateTime<Utc>, latitude: f64, longitude: f64) -> SolarPosition {
    let elapsed_days = (time.timestamp_millis() - J2000_UNIX_MILLIS) as f64 / 86_400_000.0;
    let decimal_hours = f64::from(time.hour())
        + f64::from(time.minute()) / 60.0
        + f64::from(time.second()) / 3600.0
        + f64::from(time.nanosecond()) / 3.6e12;

    // ecliptic coordinates
    let omega = 2.1429 - 0.0010394594 * elapsed_days;
    let mean_longitude = 4.8950630 + 0.017202791698 * elapsed_days;
    let mean_anomaly = 6.2400600 + 0.0172019699 * elapsed_days;
    let ecliptic_longitude = mean_longitude
        + 0.03341607 * mean_anomaly.sin()
        + 0.00034894 * (2.0 * mean_anomaly).sin()
        - 0.0001134
        - 0.0000203 * omega.sin();
    let ecliptic_obliquity = 0.4090928 - 6.2140e-9 * elapsed_days + 0.0000396 * omega.cos();

    // celestial coordinates
    let sin_longitude = ecliptic_longitude.sin();
    let mut right_ascension =
        (ecliptic_obliquity.cos() * sin_longitude).atan2(ecliptic_longitude.cos());
    if right_ascension < 0.0 {
        right_ascension += std::f64::consts::TAU;
    }
    let declination = (ecliptic_obliquity.sin() * sin_longitude).asin();

    // local coordinates
    let gmst = 6.6974243242 + 0.0657098283 * elapsed_days + decimal_hours;
    let lmst = (gmst * 15.0 + longitude).to_radians();
    let hour_angle = lmst - right_ascension;
    let lat = latitude.to_radians();

    let zenith = (lat.cos() * hour_angle.cos() * declination.cos()
        + declination.sin() * lat.sin())
    .clamp(-1.0, 1.0)
    .acos();
    let mut azimuth = (-hour_angle.sin())
        .atan2(declination.tan() * lat.cos() - lat.sin() * hour_angle.cos());
    if azimuth < 0.0 {
        azimuth += std::f64::consts::TAU;
    }
    let parallax = EARTH_MEAN_RADIUS_KM / ASTRONOMICAL_UNIT_KM * zenith.sin();

    SolarPosition {
        zenith: (zenith + parallax).to_degrees(),
        azimuth: azimuth.to_degrees(),
    }
}

/// Inverse UTM on WGS84 (Krueger series). Returns `(longitude, latitude)`.
pub fn utm_to_lonlat(zone: UtmZone, easting: f64, northing: f64) -> (f64, f64) {
    let n_km = northing / 1000.0;
    let e_km = easting / 1000.0;

    let k0_a = 6364.902166165086634;
    let beta = [
        0.000837732164082144,
        0.00000005906110863719917,
        0.00000000016769911794379754,
    ];
    let delta = [
        0.003356551448628875,
        0.000006571913193172695,
        0.0000000176774599620756,
    ];

    let false_northing = if zone.north { 0.0 } else { 10000.0 };
    let xi = (n_km - false_northing) / k0_a;
    let eta = (e_km - 500.0) / k0_a;

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, b) in beta.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        xi_p -= b * (k * xi).sin() * (k * eta).cosh();
        eta_p -= b * (k * xi).cos() * (k * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, d) in delta.iter().enumerate() {
        phi += d * (2.0 * (j + 1) as f64 * chi).sin();
    }
    let lambda = zone.central_meridian().to_radians() + (eta_p.sinh() / xi_p.cos()).atan();

    (lambda.to_degrees(), phi.to_degrees())
}

/// Sun-synchronous orbit used to model a nominal overpass time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverpassModel {
    /// Orbit inclination in degrees
    pub inclination: f64,
    /// Local time of the descending node in hours
    pub descending_node_hours: f64,
}

pub const LANDSAT8_OVERPASS: OverpassModel = OverpassModel {
    inclination: 98.2,
    descending_node_hours: 10.18333333333,
};

pub const SENTINEL2_OVERPASS: OverpassModel = OverpassModel {
    inclination: 98.62,
    descending_node_hours: 10.5,
};

impl OverpassModel {
    /// Mean local solar time of the overpass at `latitude`; `None` where the
    /// ground track never reaches that latitude.
    pub fn local_overpass_hours(&self, latitude: f64) -> Option<f64> {
        let ratio = latitude.to_radians().tan() / self.inclination.to_radians().tan();
        if !ratio.is_finite() || ratio.abs() > 1.0 {
            return None;
        }
        Some(self.descending_node_hours - ratio.asin().to_degrees() / 15.0)
    }

    /// Solar zenith at the modelled overpass on `date`
    pub fn solar_zenith(&self, date: NaiveDate, longitude: f64, latitude: f64) -> Option<f64> {
        let local_hours = self.local_overpass_hours(latitude)?;
        let utc_hours = local_hours - longitude / 15.0;
        let midnight = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
        let overpass = midnight + Duration::milliseconds((utc_hours * 3.6e6).round() as i64);
        Some(solar_position(overpass, latitude, longitude).zenith)
    }
}

/// How the reference solar zenith was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZenithSource {
    /// Mean of the Landsat-8 and Sentinel-2 overpass models
    OverpassModel,
    /// Mean of observed valid solar zeniths (high latitude)
    ObservedMean,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSolarZenith {
    pub degrees: f64,
    pub source: ZenithSource,
}

/// Reference solar zenith for a tile.
///
/// Uses the overpass models at the tile center, or `observed_mean` when the
/// center lies poleward of `high_latitude_limit`.
pub fn reference_solar_zenith(
    canvas: &TileCanvas,
    sensing_time: DateTime<Utc>,
    observed_mean: Option<f64>,
    high_latitude_limit: f64,
) -> NbarResult<ReferenceSolarZenith> {
    let (x, y) = canvas.center();
    let (longitude, latitude) = utm_to_lonlat(canvas.zone, x, y);
    let date = sensing_time.date_naive();

    let modelled = if latitude.abs() <= high_latitude_limit {
        LANDSAT8_OVERPASS
            .solar_zenith(date, longitude, latitude)
            .zip(SENTINEL2_OVERPASS.solar_zenith(date, longitude, latitude))
            .map(|(l8, s2)| (l8 + s2) / 2.0)
    } else {
        None
    };

    let reference = match (modelled, observed_mean) {
        (Some(degrees), _) => ReferenceSolarZenith {
            degrees,
            source: ZenithSource::OverpassModel,
        },
        (None, Some(degrees)) => ReferenceSolarZenith {
            degrees,
            source: ZenithSource::ObservedMean,
        },
        (None, None) => {
            return Err(NbarError::MissingData(format!(
                "No overpass model at latitude {:.2} and no valid observed solar zenith",
                latitude
            )))
        }
    };

    log::info!(
        "Reference solar zenith {:.4} deg ({:?}) at lat {:.4}, lon {:.4}",
        reference.degrees,
        reference.source,
        latitude,
        longitude
    );
    Ok(reference)
}
