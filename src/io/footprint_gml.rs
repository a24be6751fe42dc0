use crate::core::footprint::DetectorPolygon;
use crate::types::{Band, NbarError, NbarResult, DETECTOR_COUNT};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Parse detector footprint polygons from a Sentinel-2 `MSK_DETFOO` GML document.
///
/// Each `MaskFeature` whose `gml:id` reads `detector_footprint-<band>-<detector>[-<n>]`
/// contributes the first `posList` it contains (the exterior ring).
pub fn parse_detector_footprints(
    xml_content: &str,
    band: Band,
    source_name: &str,
) -> NbarResult<Vec<DetectorPolygon>> {
    log::debug!("Parsing footprint GML {} ({} bytes)", source_name, xml_content.len());

    let id_pattern = Regex::new(r"detector_footprint-(B\w+?)-(\d+)")
        .map_err(|e| NbarError::Processing(format!("Invalid footprint id pattern: {}", e)))?;

    let mut reader = Reader::from_str(xml_content);
    reader.trim_text(true);

    let mut polygons = Vec::new();
    let mut buf = Vec::new();

    // State tracking for parsing
    let mut current_detector: Option<u8> = None;
    let mut ring_done = false;
    let mut in_pos_list = false;
    let mut dimension = 2usize;
    let mut coordinates = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"MaskFeature" => {
                    current_detector = feature_detector(e, &id_pattern, band)?;
                    ring_done = false;
                }
                b"posList" if current_detector.is_some() && !ring_done => {
                    in_pos_list = true;
                    dimension = srs_dimension(e, source_name)?;
                    coordinates.clear();
                }
                _ => {}
            },
            Ok(Event::Text(ref e)) => {
                if in_pos_list {
                    let text = e
                        .unescape()
                        .map_err(|e| NbarError::XmlParsing(format!("{}: {}", source_name, e)))?;
                    coordinates.push(' ');
                    coordinates.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"posList" if in_pos_list => {
                    in_pos_list = false;
                    ring_done = true;
                    if let Some(detector) = current_detector {
                        let vertices = parse_pos_list(&coordinates, dimension, source_name)?;
                        polygons.push(DetectorPolygon::new(detector, vertices));
                    }
                }
                b"MaskFeature" => current_detector = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(NbarError::XmlParsing(format!(
                    "{} at position {}: {}",
                    source_name,
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if polygons.is_empty() {
        return Err(NbarError::FootprintVectorNotFound {
            band: band.name().to_string(),
            source_name: source_name.to_string(),
        });
    }

    log::info!(
        "Found {} detector footprint polygons for {} in {}",
        polygons.len(),
        band,
        source_name
    );
    Ok(polygons)
}

/// Read the footprint GML of `band` from disk
pub fn read_detector_footprints<P: AsRef<Path>>(
    path: P,
    band: Band,
) -> NbarResult<Vec<DetectorPolygon>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    parse_detector_footprints(&content, band, &path.display().to_string())
}

/// Footprint file of `band` next to the B01 file, by swapping the band token
pub fn footprint_path_for_band(b01_path: &Path, band: Band) -> PathBuf {
    match b01_path.file_name().and_then(|n| n.to_str()) {
        Some(name) => b01_path.with_file_name(name.replacen("B01", band.name(), 1)),
        None => b01_path.to_path_buf(),
    }
}

/// Detector of a `MaskFeature`, or `None` when it is not a footprint of `band`
fn feature_detector(e: &BytesStart, pattern: &Regex, band: Band) -> NbarResult<Option<u8>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| NbarError::XmlParsing(format!("Bad attribute: {}", e)))?;
        if attr.key.local_name().as_ref() != b"id" {
            continue;
        }
        let id = attr
            .unescape_value()
            .map_err(|e| NbarError::XmlParsing(format!("Bad gml:id: {}", e)))?;
        let caps = match pattern.captures(&id) {
            Some(caps) => caps,
            None => return Ok(None),
        };
        if Band::from_name(&caps[1]) != Some(band) {
            log::debug!("Skipping footprint {} (not {})", id, band);
            return Ok(None);
        }
        let detector: u8 = caps[2]
            .parse()
            .map_err(|_| NbarError::InvalidFormat(format!("Bad detector in '{}'", id)))?;
        if detector == 0 || detector > DETECTOR_COUNT {
            return Err(NbarError::InvalidFormat(format!(
                "Detector {} out of range in '{}'",
                detector, id
            )));
        }
        return Ok(Some(detector));
    }
    Ok(None)
}

/// Coordinate dimension of a `posList`; the attribute is required
fn srs_dimension(e: &BytesStart, source_name: &str) -> NbarResult<usize> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| NbarError::XmlParsing(format!("Bad attribute: {}", e)))?;
        if attr.key.local_name().as_ref() == b"srsDimension" {
            let value = attr
                .unescape_value()
                .map_err(|e| NbarError::XmlParsing(format!("Bad srsDimension: {}", e)))?;
            return match value.trim().parse::<usize>() {
                Ok(d @ 2..=3) => Ok(d),
                _ => Err(NbarError::InvalidFormat(format!(
                    "Unsupported srsDimension '{}'",
                    value
                ))),
            };
        }
    }
    Err(NbarError::InvalidFormat(format!(
        "{}: posList without srsDimension",
        source_name
    )))
}

/// Group a flat coordinate list into (x, y) vertices, dropping Z and the
/// repeated closing vertex.
fn parse_pos_list(text: &str, dimension: usize, source_name: &str) -> NbarResult<Vec<(f64, f64)>> {
    let numbers = text
        .split_whitespace()
        .map(|t| t.parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| NbarError::InvalidFormat(format!("{}: bad posList value: {}", source_name, e)))?;
    if numbers.len() % dimension != 0 {
        return Err(NbarError::InvalidFormat(format!(
            "{}: posList has {} values, not a multiple of {}",
            source_name,
            numbers.len(),
            dimension
        )));
    }

    let mut vertices: Vec<(f64, f64)> = numbers
        .chunks_exact(dimension)
        .map(|c| (c[0], c[1]))
        .collect();
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    Ok(vertices)
}
