use crate::types::NbarResult;
#[cfg(feature = "gdal")]
use crate::types::{GeoTransform, UtmZone};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Borrowed 2-D band of one of the element types the products use
#[derive(Debug, Clone, Copy)]
pub enum RasterData<'a> {
    U8(&'a Array2<u8>),
    U16(&'a Array2<u16>),
    I16(&'a Array2<i16>),
    F32(&'a Array2<f32>),
}

impl RasterData<'_> {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            RasterData::U8(a) => a.dim(),
            RasterData::U16(a) => a.dim(),
            RasterData::I16(a) => a.dim(),
            RasterData::F32(a) => a.dim(),
        }
    }

    pub fn to_owned(&self) -> RasterBuffer {
        match self {
            RasterData::U8(a) => RasterBuffer::U8((*a).clone()),
            RasterData::U16(a) => RasterBuffer::U16((*a).clone()),
            RasterData::I16(a) => RasterBuffer::I16((*a).clone()),
            RasterData::F32(a) => RasterBuffer::F32((*a).clone()),
        }
    }
}

/// Owned copy of a band
#[derive(Debug, Clone, PartialEq)]
pub enum RasterBuffer {
    U8(Array2<u8>),
    U16(Array2<u16>),
    I16(Array2<i16>),
    F32(Array2<f32>),
}

/// Scalar or array attribute attached to the container
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Text(s) => write!(f, "{}", s),
            AttributeValue::Bytes(b) => {
                let items: Vec<String> = b.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", items.join(","))
            }
        }
    }
}

/// Destination for named bands and attributes of a granule product
pub trait RasterSink {
    fn write_band(&mut self, name: &str, data: RasterData<'_>, no_data: f64) -> NbarResult<()>;

    fn set_attribute(&mut self, name: &str, value: AttributeValue) -> NbarResult<()>;
}

/// Keeps every band and attribute in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub bands: BTreeMap<String, (RasterBuffer, f64)>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn band(&self, name: &str) -> Option<&RasterBuffer> {
        self.bands.get(name).map(|(b, _)| b)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

impl RasterSink for MemorySink {
    fn write_band(&mut self, name: &str, data: RasterData<'_>, no_data: f64) -> NbarResult<()> {
        self.bands.insert(name.to_string(), (data.to_owned(), no_data));
        Ok(())
    }

    fn set_attribute(&mut self, name: &str, value: AttributeValue) -> NbarResult<()> {
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }
}

/// Writes one GeoTIFF per band into a directory; attributes become dataset
/// metadata of every band written afterwards.
#[cfg(feature = "gdal")]
pub struct GeoTiffSink {
    directory: std::path::PathBuf,
    transform: GeoTransform,
    epsg: u32,
    attributes: BTreeMap<String, AttributeValue>,
}

#[cfg(feature = "gdal")]
impl GeoTiffSink {
    pub fn new<P: AsRef<std::path::Path>>(directory: P, transform: GeoTransform, zone: UtmZone) -> Self {
        let epsg = if zone.north { 32600 } else { 32700 } + u32::from(zone.zone);
        Self {
            directory: directory.as_ref().to_path_buf(),
            transform,
            epsg,
            attributes: BTreeMap::new(),
        }
    }

    fn write_typed<T: gdal::raster::GdalType + Copy>(
        &self,
        name: &str,
        image: &Array2<T>,
        no_data: f64,
    ) -> NbarResult<()> {
        use gdal::{DriverManager, Metadata};

        let path = self.directory.join(format!("{}.tif", name));
        log::debug!("Writing band {} to {}", name, path.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = image.dim();
        let mut dataset =
            driver.create_with_band_type::<T, _>(&path, width as isize, height as isize, 1)?;

        dataset.set_geo_transform(&self.transform.to_array())?;
        dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(self.epsg)?)?;
        for (key, value) in &self.attributes {
            dataset.set_metadata_item(key, &value.to_string(), "")?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<T> = image.iter().copied().collect();
        let buffer = gdal::raster::Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(no_data))?;
        Ok(())
    }
}

#[cfg(feature = "gdal")]
impl RasterSink for GeoTiffSink {
    fn write_band(&mut self, name: &str, data: RasterData<'_>, no_data: f64) -> NbarResult<()> {
        match data {
            RasterData::U8(a) => self.write_typed(name, a, no_data),
            RasterData::U16(a) => self.write_typed(name, a, no_data),
            RasterData::I16(a) => self.write_typed(name, a, no_data),
            RasterData::F32(a) => self.write_typed(name, a, no_data),
        }
    }

    fn set_attribute(&mut self, name: &str, value: AttributeValue) -> NbarResult<()> {
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }
}
