use approx::assert_abs_diff_eq;
use chrono::{TimeZone, Utc};
use ndarray::Array2;
use s2nbar::core::brdf::coefficients_for;
use s2nbar::core::footprint::DetectorPolygon;
use s2nbar::core::nbar::round_to_i16;
use s2nbar::core::pipeline::{write_reflectance, FootprintSource, GranuleInputs};
use s2nbar::core::solar_position::ZenithSource;
use s2nbar::io::product::{AttributeValue, RasterBuffer};
use s2nbar::types::{Band, ExitStatus, NbarError, ANGLE_FILL};
use s2nbar::{GranuleProcessor, MemorySink, TileMetadataReader};
use std::collections::HashMap;
use std::io::Write;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 23x23 `Values_List`; `value(i, j)` of `None` is written as NaN
fn values_list<F: Fn(usize, usize) -> Option<f64>>(value: F) -> String {
    let mut rows = String::new();
    for i in 0..23 {
        let row: Vec<String> = (0..23)
            .map(|j| match value(i, j) {
                Some(v) => format!("{}", v),
                None => "NaN".to_string(),
            })
            .collect();
        rows.push_str(&format!("<VALUES>{}</VALUES>", row.join(" ")));
    }
    format!("<Values_List>{}</Values_List>", rows)
}

fn angle_grid<F: Fn(usize, usize) -> Option<f64>>(name: &str, value: F) -> String {
    format!(
        r#"<{name}><COL_STEP unit="m">300</COL_STEP><ROW_STEP unit="m">300</ROW_STEP>{}</{name}>"#,
        values_list(value),
        name = name
    )
}

fn viewing_grid(detector: u8, zenith: f64, azimuth: f64, valid: fn(usize) -> bool) -> String {
    format!(
        r#"<Viewing_Incidence_Angles_Grids bandId="5" detectorId="{}">{}{}</Viewing_Incidence_Angles_Grids>"#,
        detector,
        angle_grid("Zenith", |_, j| if valid(j) { Some(zenith) } else { None }),
        angle_grid("Azimuth", |_, j| if valid(j) { Some(azimuth) } else { None }),
    )
}

fn tile_metadata_xml(viewing: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:General_Info>
    <TILE_ID metadataLevel="Brief">S2B_OPER_MSI_L1C_TL_2BPS_20200615T105000_A017100_T31TFL_N02.09</TILE_ID>
    <SENSING_TIME metadataLevel="Standard">2020-06-15T10:50:00.000Z</SENSING_TIME>
  </n1:General_Info>
  <n1:Geometric_Info>
    <Tile_Geocoding metadataLevel="Brief">
      <HORIZONTAL_CS_NAME>WGS84 / UTM zone 31N</HORIZONTAL_CS_NAME>
      <HORIZONTAL_CS_CODE>EPSG:32631</HORIZONTAL_CS_CODE>
      <Size resolution="10"><NROWS>690</NROWS><NCOLS>690</NCOLS></Size>
      <Size resolution="20"><NROWS>345</NROWS><NCOLS>345</NCOLS></Size>
      <Geoposition resolution="10"><ULX>600000</ULX><ULY>5000040</ULY><XDIM>10</XDIM><YDIM>-10</YDIM></Geoposition>
      <Geoposition resolution="20"><ULX>600000</ULX><ULY>5000040</ULY><XDIM>20</XDIM><YDIM>-20</YDIM></Geoposition>
    </Tile_Geocoding>
    <Tile_Angles metadataLevel="Standard">
      <Sun_Angles_Grid>{}{}</Sun_Angles_Grid>
      <Mean_Sun_Angle><ZENITH_ANGLE unit="deg">40</ZENITH_ANGLE><AZIMUTH_ANGLE unit="deg">150</AZIMUTH_ANGLE></Mean_Sun_Angle>
      {}
    </Tile_Angles>
  </n1:Geometric_Info>
</n1:Level-1C_Tile_ID>"#,
        angle_grid("Zenith", |_, _| Some(40.0)),
        angle_grid("Azimuth", |_, _| Some(150.0)),
        viewing
    )
}

fn standard_viewing() -> String {
    // detector 1 covers the west half of the tile, detector 2 the east half
    viewing_grid(1, 8.0, 250.0, |j| j <= 13) + &viewing_grid(2, 6.0, 250.0, |j| j >= 10)
}

fn shared_polygons() -> Vec<DetectorPolygon> {
    let rectangle = |detector: u8, x0: f64, x1: f64| {
        DetectorPolygon::new(
            detector,
            vec![(x0, 5001000.0), (x1, 5001000.0), (x1, 4993000.0), (x0, 4993000.0)],
        )
    };
    vec![
        rectangle(1, 599000.0, 603450.0),
        rectangle(2, 603450.0, 607900.0),
    ]
}

#[test]
fn test_read_tile_metadata() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("MTD_TL.xml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(tile_metadata_xml(&standard_viewing()).as_bytes())
        .unwrap();

    let metadata = TileMetadataReader::read(&path, 30.0).unwrap();
    assert_eq!(metadata.canvas.size, 230);
    assert_eq!(metadata.canvas.pixel_size, 30.0);
    assert_eq!(metadata.canvas.ulx, 600000.0);
    assert_eq!(metadata.canvas.uly, 5000040.0);
    assert_eq!(metadata.canvas.zone.zone, 31);
    assert!(metadata.canvas.zone.north);
    assert_eq!(
        metadata.sensing_time,
        Utc.with_ymd_and_hms(2020, 6, 15, 10, 50, 0).unwrap()
    );

    let grids = &metadata.angle_grids;
    assert_eq!(grids.sun_zenith.values.dim(), (23, 23));
    assert_eq!(grids.sun_zenith.valid_count(), 23 * 23);
    assert_eq!(grids.sun_zenith.values[[4, 7]], 4000);
    assert_eq!(grids.view.len(), 2);
    assert_eq!(grids.view[0].band, Band::B06);
    assert_eq!(grids.view[1].detector, 2);
    assert_eq!(grids.view[0].zenith.valid_count(), 23 * 14);
    assert_eq!(grids.view[1].azimuth.values[[0, 0]], ANGLE_FILL);

    // same tile at 20 m
    let coarse = TileMetadataReader::read(&path, 20.0).unwrap();
    assert_eq!(coarse.canvas.size, 345);
}

#[test]
fn test_granule_from_tile_metadata() {
    init_logging();
    let metadata = TileMetadataReader::parse(&tile_metadata_xml(&standard_viewing()), 30.0).unwrap();
    let shape = metadata.canvas.shape();
    let inputs = GranuleInputs {
        canvas: metadata.canvas.clone(),
        sensing_time: metadata.sensing_time,
        angle_grids: metadata.angle_grids,
        footprints: FootprintSource::SharedVectors(shared_polygons()),
    };

    let mut reflectance = HashMap::new();
    reflectance.insert(Band::B04, Array2::from_elem(shape, 1500i16));
    reflectance.insert(Band::B10, Array2::from_elem(shape, 300i16));

    let (status, products) = GranuleProcessor::standard().run(&inputs, &mut reflectance);
    assert_eq!(status, ExitStatus::Success);
    let products = products.unwrap();

    let reference = products.nbar.provenance.reference_solar_zenith;
    assert_eq!(reference.source, ZenithSource::OverpassModel);
    assert!(reference.degrees > 20.0 && reference.degrees < 30.0);

    let red = coefficients_for(Band::B04).unwrap();
    let nadir = red.reflectance(reference.degrees, 0.0, 0.0);
    let west = round_to_i16(1500.0 * nadir / red.reflectance(40.0, 8.0, 100.0));
    let east = round_to_i16(1500.0 * nadir / red.reflectance(40.0, 6.0, 100.0));
    let corrected = &reflectance[&Band::B04];
    assert!((i32::from(corrected[[10, 0]]) - i32::from(west)).abs() <= 1);
    assert!((i32::from(corrected[[200, 114]]) - i32::from(west)).abs() <= 1);
    assert!((i32::from(corrected[[10, 115]]) - i32::from(east)).abs() <= 1);
    assert!((i32::from(corrected[[229, 229]]) - i32::from(east)).abs() <= 1);
    assert!(reflectance[&Band::B10].iter().all(|&r| r == 300));

    let mut sink = MemorySink::new();
    products.write_to(&mut sink).unwrap();
    write_reflectance(&mut sink, &reflectance).unwrap();

    for name in ["detfoo", "solar_zenith", "solar_azimuth", "view_zenith", "view_azimuth"] {
        assert!(sink.band(name).is_some(), "missing band {}", name);
    }
    match sink.band("detfoo") {
        Some(RasterBuffer::U8(image)) => {
            assert_eq!(image[[0, 114]], 1);
            assert_eq!(image[[0, 115]], 2);
        }
        other => panic!("unexpected detfoo: {:?}", other),
    }
    // corrected reflectance and its c-factor live side by side
    match sink.band("B04") {
        Some(RasterBuffer::I16(image)) => assert_eq!(image, corrected),
        other => panic!("unexpected B04: {:?}", other),
    }
    match sink.band("B04_cfactor") {
        Some(RasterBuffer::F32(ratio)) => {
            assert_eq!(ratio, &products.nbar.cfactor[&Band::B04]);
            assert!(ratio.iter().all(|&q| q > 0.0));
        }
        other => panic!("unexpected B04_cfactor: {:?}", other),
    }
    assert_eq!(sink.bands["B04_cfactor"].1, f64::from(s2nbar::types::CFACTOR_FILL));
    assert!(sink.band("B10").is_some());
    assert!(sink.band("B10_cfactor").is_none());
    assert_eq!(
        sink.attribute("AngleBand"),
        Some(&AttributeValue::Bytes(vec![5; 13]))
    );
    assert_eq!(
        sink.attribute("REFERENCE_SOLAR_ZENITH_SOURCE").map(|v| v.to_string()),
        Some("OverpassModel".to_string())
    );
    match sink.attribute("MEAN_SUN_ZENITH_ANGLE") {
        Some(AttributeValue::Float(v)) => assert_abs_diff_eq!(*v, 40.0, epsilon = 1e-9),
        other => panic!("unexpected mean sun zenith: {:?}", other),
    }
}

#[test]
fn test_viewing_grid_without_azimuth_is_fatal() {
    init_logging();
    let broken = format!(
        r#"<Viewing_Incidence_Angles_Grids bandId="5" detectorId="1">{}</Viewing_Incidence_Angles_Grids>"#,
        angle_grid("Zenith", |_, _| Some(8.0))
    );
    let err = TileMetadataReader::parse(&tile_metadata_xml(&broken), 30.0).unwrap_err();
    assert!(matches!(err, NbarError::InvalidFormat(_)));
    assert_eq!(err.exit_status(), ExitStatus::Fatal);
    assert_eq!(err.exit_status().code(), 1);
}

#[test]
fn test_detector_id_out_of_range_is_invalid() {
    let xml = tile_metadata_xml(&viewing_grid(13, 8.0, 250.0, |_| true));
    let err = TileMetadataReader::parse(&xml, 30.0).unwrap_err();
    assert!(matches!(err, NbarError::InvalidFormat(_)));
}
