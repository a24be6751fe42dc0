use s2nbar::core::footprint::{encode_overlap, DetectorPolygon, FootprintRasterizer};
use s2nbar::io::footprint_gml::{footprint_path_for_band, read_detector_footprints};
use s2nbar::types::{Band, NbarError, TileCanvas, UtmZone, DETECTOR_FILL};
use ndarray::Array2;
use std::io::Write;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn canvas() -> TileCanvas {
    TileCanvas::new(100, 30.0, 300000.0, 4000000.0, UtmZone::new(17, true))
}

fn rectangle(detector: u8, x0: f64, x1: f64, y0: f64, y1: f64) -> DetectorPolygon {
    DetectorPolygon::new(detector, vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
}

#[test]
fn test_rectangles_contain_exactly_their_pixels() {
    init_logging();
    let c = canvas();
    // edges fall between pixel centers
    let polygons = vec![
        rectangle(1, 300000.0, 301200.0, 3997000.0, 4000000.0),
        rectangle(2, 301200.0, 302400.0, 3997600.0, 3999400.0),
        rectangle(3, 302400.0, 303000.0, 3997000.0, 4000000.0),
    ];
    let image = FootprintRasterizer::standard()
        .rasterize(&c, &polygons)
        .unwrap();

    for row in 0..c.size {
        let y = c.row_center_y(row);
        for col in 0..c.size {
            let x = c.col_center_x(col);
            let inside: Vec<u8> = polygons
                .iter()
                .filter(|p| {
                    let (x0, y0) = p.vertices[0];
                    let (x1, y1) = p.vertices[2];
                    x > x0 && x < x1 && y > y0 && y < y1
                })
                .map(|p| p.detector)
                .collect();
            assert!(inside.len() <= 1, "pixel ({}, {}) inside two rectangles", row, col);
            let expected = inside.first().copied().unwrap_or(DETECTOR_FILL);
            assert_eq!(image[[row, col]], expected, "pixel ({}, {})", row, col);
        }
    }

    assert_eq!(image[[0, 0]], 1);
    assert_eq!(image[[0, 45]], DETECTOR_FILL);
    assert_eq!(image[[50, 45]], 2);
    assert_eq!(image[[99, 99]], 3);
}

#[test]
fn test_row_without_crossings_is_empty() {
    let c = canvas();
    // polygon entirely north of the tile
    let far = rectangle(4, 300000.0, 303000.0, 4100000.0, 4200000.0);
    let image = FootprintRasterizer::standard().rasterize(&c, &[far]).unwrap();
    assert!(image.iter().all(|&d| d == DETECTOR_FILL));
}

#[test]
fn test_legacy_raster_overlap_resolves_to_neighbors() {
    let rasterizer = FootprintRasterizer::standard();
    let code = encode_overlap(2, 3);
    let mut image = Array2::from_shape_fn((4, 12), |(_, c)| match c {
        0..=3 => 2u8,
        4..=7 => code,
        _ => 3u8,
    });
    rasterizer.split_overlap(&mut image);
    for row in image.rows() {
        assert_eq!(row.to_vec(), vec![2, 2, 2, 2, 2, 2, 3, 3, 3, 3, 3, 3]);
    }
}

const GML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<eop:Mask xmlns:eop="http://www.opengis.net/eop/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" gml:id="MSK_DETFOO_B04">
  <gml:boundedBy><gml:Envelope srsName="urn:ogc:def:crs:EPSG::32617"/></gml:boundedBy>
  <eop:maskMembers>
    <eop:MaskFeature gml:id="detector_footprint-B04-06-0">
      <eop:maskType codeSpace="urn:gs2:S2PDGS:maskType">DETECTOR_FOOTPRINT</eop:maskType>
      <eop:extentOf>
        <gml:Polygon gml:id="detector_footprint-B04-06-0.1">
          <gml:exterior><gml:LinearRing>
            <gml:posList srsDimension="3">300000 4000000 0 301500 4000000 0 301500 3997000 0 300000 3997000 0 300000 4000000 0</gml:posList>
          </gml:LinearRing></gml:exterior>
        </gml:Polygon>
      </eop:extentOf>
    </eop:MaskFeature>
    <eop:MaskFeature gml:id="detector_footprint-B04-07-0">
      <eop:maskType codeSpace="urn:gs2:S2PDGS:maskType">DETECTOR_FOOTPRINT</eop:maskType>
      <eop:extentOf>
        <gml:Polygon gml:id="detector_footprint-B04-07-0.1">
          <gml:exterior><gml:LinearRing>
            <gml:posList srsDimension="3">301500 4000000 0 303000 4000000 0 303000 3997000 0 301500 3997000 0 301500 4000000 0</gml:posList>
          </gml:LinearRing></gml:exterior>
        </gml:Polygon>
      </eop:extentOf>
    </eop:MaskFeature>
  </eop:maskMembers>
</eop:Mask>"#;

#[test]
fn test_gml_footprints_from_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let b01 = dir.path().join("MSK_DETFOO_B01.gml");
    let b04 = footprint_path_for_band(&b01, Band::B04);
    let mut file = std::fs::File::create(&b04).unwrap();
    file.write_all(GML.as_bytes()).unwrap();

    let polygons = read_detector_footprints(&b04, Band::B04).unwrap();
    assert_eq!(polygons.len(), 2);
    assert_eq!(polygons[0].detector, 6);
    assert_eq!(polygons[1].detector, 7);
    assert_eq!(polygons[0].vertices.len(), 4);

    let image = FootprintRasterizer::standard()
        .rasterize(&canvas(), &polygons)
        .unwrap();
    assert_eq!(image[[10, 0]], 6);
    assert_eq!(image[[10, 49]], 6);
    assert_eq!(image[[10, 50]], 7);
    assert!(image.iter().all(|&d| d == 6 || d == 7));

    // the file holds no footprint for another band
    let err = read_detector_footprints(&b04, Band::B05).unwrap_err();
    assert!(matches!(err, NbarError::FootprintVectorNotFound { .. }));
    assert_eq!(err.exit_status().code(), 100);

    // absent file is an I/O error
    assert!(matches!(
        read_detector_footprints(&b01, Band::B01),
        Err(NbarError::Io(_))
    ));
}
