//! Per-granule driver: footprints, then angles, then NBAR.
//!
//! Every buffer is owned by one `process` call; granules share nothing and
//! may be processed concurrently by the caller.

use crate::core::footprint::{DetectorPolygon, FootprintParams, FootprintRasterizer, FootprintSet};
use crate::core::nbar::{NbarNormalizer, NbarOutput, NbarParams};
use crate::core::sun_view::{AngleGridSet, AngleReconstructor, SunViewAngles, ViewAngleMode};
use crate::io::product::{AttributeValue, RasterData, RasterSink};
use crate::types::{
    Band, DetectorImage, ExitStatus, NbarError, NbarResult, ReflectanceImage, TileCanvas,
    ANGLE_FILL, CFACTOR_FILL, DETECTOR_FILL, HLS_PIXEL_SIZE, REFLECTANCE_FILL,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Configuration for processing one granule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GranuleConfig {
    pub footprint: FootprintParams,
    pub view_mode: ViewAngleMode,
    pub nbar: NbarParams,
}

impl GranuleConfig {
    /// Working pixel size of the harmonized products
    pub fn pixel_size(&self) -> f64 {
        HLS_PIXEL_SIZE
    }
}

/// Where detector footprints come from
#[derive(Debug, Clone)]
pub enum FootprintSource {
    /// Polygons per band
    Vectors(HashMap<Band, Vec<DetectorPolygon>>),
    /// One polygon set for every band
    SharedVectors(Vec<DetectorPolygon>),
    /// Pre-rasterized detector IDs at a coarser pixel size, shared by all bands
    Raster {
        image: DetectorImage,
        pixel_size: f64,
    },
}

/// Everything needed to normalize one granule
#[derive(Debug, Clone)]
pub struct GranuleInputs {
    pub canvas: TileCanvas,
    pub sensing_time: DateTime<Utc>,
    pub angle_grids: AngleGridSet,
    pub footprints: FootprintSource,
}

/// Products of one granule besides the corrected reflectance
#[derive(Debug, Clone)]
pub struct GranuleProducts {
    pub footprints: FootprintSet,
    pub angles: SunViewAngles,
    pub nbar: NbarOutput,
}

/// Runs footprint rasterization, angle reconstruction and NBAR over a granule
pub struct GranuleProcessor {
    config: GranuleConfig,
}

impl GranuleProcessor {
    pub fn new(config: GranuleConfig) -> Self {
        Self { config }
    }

    pub fn standard() -> Self {
        Self::new(GranuleConfig::default())
    }

    /// Process one granule, rewriting `reflectance` in place
    pub fn process(
        &self,
        inputs: &GranuleInputs,
        reflectance: &mut HashMap<Band, ReflectanceImage>,
    ) -> NbarResult<GranuleProducts> {
        let canvas = &inputs.canvas;
        if (canvas.pixel_size - self.config.pixel_size()).abs() > f64::EPSILON {
            log::warn!(
                "Canvas pixel size {} m differs from working size {} m",
                canvas.pixel_size,
                self.config.pixel_size()
            );
        }
        for (band, image) in reflectance.iter() {
            canvas.check_shape(&format!("{} reflectance", band), image.dim())?;
        }

        let footprints = self.build_footprints(&inputs.footprints, canvas)?;

        let reconstructor = AngleReconstructor::new(self.config.view_mode);
        let angles = reconstructor.reconstruct(&inputs.angle_grids, &footprints, canvas)?;

        let normalizer = NbarNormalizer::new(self.config.nbar.clone());
        let reference = normalizer.reference_zenith(canvas, inputs.sensing_time, &angles)?;
        let nbar = normalizer.normalize(reflectance, &angles, reference)?;

        log::info!(
            "Granule done: {} of {} bands normalized",
            nbar.provenance.corrected_bands.len(),
            reflectance.len()
        );
        Ok(GranuleProducts {
            footprints,
            angles,
            nbar,
        })
    }

    /// Process a granule and classify the outcome for the driver
    pub fn run(
        &self,
        inputs: &GranuleInputs,
        reflectance: &mut HashMap<Band, ReflectanceImage>,
    ) -> (ExitStatus, Option<GranuleProducts>) {
        match self.process(inputs, reflectance) {
            Ok(products) => (ExitStatus::Success, Some(products)),
            Err(e) => {
                let status = e.exit_status();
                match status {
                    ExitStatus::SkipGranule => log::warn!("Skipping granule: {}", e),
                    _ => log::error!("Granule processing failed: {}", e),
                }
                (status, None)
            }
        }
    }

    fn build_footprints(
        &self,
        source: &FootprintSource,
        canvas: &TileCanvas,
    ) -> NbarResult<FootprintSet> {
        let rasterizer = FootprintRasterizer::new(self.config.footprint.clone());
        match source {
            FootprintSource::Vectors(per_band) => {
                if per_band.is_empty() {
                    return Err(NbarError::MissingData(
                        "no detector footprint vectors supplied".to_string(),
                    ));
                }
                let mut rasters = HashMap::new();
                for (band, polygons) in per_band {
                    rasters.insert(*band, rasterizer.rasterize(canvas, polygons)?);
                }
                Ok(FootprintSet::PerBand(rasters))
            }
            FootprintSource::SharedVectors(polygons) => {
                Ok(FootprintSet::Shared(rasterizer.rasterize(canvas, polygons)?))
            }
            FootprintSource::Raster { image, pixel_size } => {
                let mut image = image.clone();
                if rasterizer.params().split_legacy_overlap {
                    rasterizer.split_overlap(&mut image);
                }
                Ok(FootprintSet::Shared(rasterizer.resample_nearest(
                    &image,
                    *pixel_size,
                    canvas,
                )?))
            }
        }
    }
}

impl GranuleProducts {
    /// Emit footprints, angles, c-factors and provenance attributes
    pub fn write_to<S: RasterSink>(&self, sink: &mut S) -> NbarResult<()> {
        let provenance = &self.nbar.provenance;
        sink.set_attribute(
            "REFERENCE_SOLAR_ZENITH",
            AttributeValue::Float(provenance.reference_solar_zenith.degrees),
        )?;
        sink.set_attribute(
            "REFERENCE_SOLAR_ZENITH_SOURCE",
            AttributeValue::Text(format!("{:?}", provenance.reference_solar_zenith.source)),
        )?;
        let means = [
            ("MEAN_SUN_ZENITH_ANGLE", provenance.mean_sun_zenith),
            ("MEAN_SUN_AZIMUTH_ANGLE", provenance.mean_sun_azimuth),
            ("MEAN_VIEW_ZENITH_ANGLE", provenance.mean_view_zenith),
            ("MEAN_VIEW_AZIMUTH_ANGLE", provenance.mean_view_azimuth),
        ];
        for (name, value) in means {
            if let Some(v) = value {
                sink.set_attribute(name, AttributeValue::Float(v))?;
            }
        }
        sink.set_attribute("AngleBand", AttributeValue::Bytes(provenance.angle_band.to_vec()))?;
        sink.set_attribute(
            "ANGLEAVAIL",
            AttributeValue::Bytes(provenance.angle_available.iter().map(|&a| a as u8).collect()),
        )?;

        let detector_fill = f64::from(DETECTOR_FILL);
        for (band, image) in self.footprints.iter() {
            let name = match band {
                Some(b) => format!("{}_detfoo", b),
                None => "detfoo".to_string(),
            };
            sink.write_band(&name, RasterData::U8(image), detector_fill)?;
        }

        let angle_fill = f64::from(ANGLE_FILL);
        sink.write_band("solar_zenith", RasterData::U16(&self.angles.sun_zenith), angle_fill)?;
        sink.write_band("solar_azimuth", RasterData::U16(&self.angles.sun_azimuth), angle_fill)?;
        let views: BTreeMap<_, _> = self.angles.view.iter().collect();
        for (band, view) in views {
            let prefix = match self.angles.mode {
                ViewAngleMode::PerBand => format!("{}_", band),
                ViewAngleMode::ReferenceBand(_) => String::new(),
            };
            sink.write_band(
                &format!("{}view_zenith", prefix),
                RasterData::U16(&view.zenith),
                angle_fill,
            )?;
            sink.write_band(
                &format!("{}view_azimuth", prefix),
                RasterData::U16(&view.azimuth),
                angle_fill,
            )?;
        }

        for (band, ratio) in &self.nbar.cfactor {
            sink.write_band(
                &format!("{}_cfactor", band),
                RasterData::F32(ratio),
                f64::from(CFACTOR_FILL),
            )?;
        }
        Ok(())
    }
}

/// Write corrected reflectance bands
pub fn write_reflectance<S: RasterSink>(
    sink: &mut S,
    reflectance: &HashMap<Band, ReflectanceImage>,
) -> NbarResult<()> {
    let ordered: BTreeMap<_, _> = reflectance.iter().collect();
    for (band, image) in ordered {
        sink.write_band(band.name(), RasterData::I16(image), f64::from(REFLECTANCE_FILL))?;
    }
    Ok(())
}
