use crate::types::{
    Band, DetectorImage, NbarError, NbarResult, TileCanvas, DETECTOR_COUNT, DETECTOR_FILL,
};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ground boundary of one detector module, in canvas projected coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorPolygon {
    /// Detector ID, 1..=12
    pub detector: u8,
    /// Closed ring; the closing edge back to the first vertex is implied
    pub vertices: Vec<(f64, f64)>,
}

impl DetectorPolygon {
    pub fn new(detector: u8, vertices: Vec<(f64, f64)>) -> Self {
        Self { detector, vertices }
    }
}

/// Parameters for footprint rasterization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FootprintParams {
    /// Overlap width (pixels) assumed when no full run is visible
    pub overlap_prior_width: usize,
    /// Resolve `left*N+right` overlap codes in pre-rasterized inputs
    pub split_legacy_overlap: bool,
}

impl Default for FootprintParams {
    fn default() -> Self {
        Self {
            overlap_prior_width: 50,
            split_legacy_overlap: true,
        }
    }
}

/// Footprint rasters for a granule
#[derive(Debug, Clone)]
pub enum FootprintSet {
    /// One raster per band
    PerBand(HashMap<Band, DetectorImage>),
    /// One raster reused for every band
    Shared(DetectorImage),
}

impl FootprintSet {
    pub fn for_band(&self, band: Band) -> Option<&DetectorImage> {
        match self {
            FootprintSet::PerBand(map) => map.get(&band),
            FootprintSet::Shared(image) => Some(image),
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (Option<Band>, &DetectorImage)> + '_> {
        match self {
            FootprintSet::PerBand(map) => {
                let mut entries: Vec<_> = map.iter().map(|(b, img)| (Some(*b), img)).collect();
                entries.sort_by_key(|(b, _)| *b);
                Box::new(entries.into_iter())
            }
            FootprintSet::Shared(image) => Box::new(std::iter::once((None, image))),
        }
    }
}

/// Overlap code stored where two adjacent detectors both claim a pixel
pub fn encode_overlap(left: u8, right: u8) -> u8 {
    left * DETECTOR_COUNT + right
}

/// Whether a detector-ID value is an unresolved overlap code
pub fn is_overlap(code: u8) -> bool {
    code > DETECTOR_COUNT
}

/// Recover `(left, right)` from an overlap code. Overlapping detectors are
/// always adjacent, so `code = left*N + left + 1`.
pub fn decode_overlap(code: u8) -> (u8, u8) {
    let left = (code - 1) / (DETECTOR_COUNT + 1);
    (left, left + 1)
}

/// Converts detector footprints into per-pixel detector-ID rasters
pub struct FootprintRasterizer {
    params: FootprintParams,
}

impl FootprintRasterizer {
    pub fn new(params: FootprintParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(FootprintParams::default())
    }

    pub fn params(&self) -> &FootprintParams {
        &self.params
    }

    /// Rasterize detector polygons in the order supplied.
    ///
    /// A pixel claimed by an earlier polygon is never reassigned.
    pub fn rasterize(
        &self,
        canvas: &TileCanvas,
        polygons: &[DetectorPolygon],
    ) -> NbarResult<DetectorImage> {
        let mut image = Array2::from_elem(canvas.shape(), DETECTOR_FILL);

        for polygon in polygons {
            if polygon.detector == DETECTOR_FILL || polygon.detector > DETECTOR_COUNT {
                return Err(NbarError::InvalidFormat(format!(
                    "Detector ID {} outside 1..={}",
                    polygon.detector, DETECTOR_COUNT
                )));
            }
            if polygon.vertices.len() < 3 {
                return Err(NbarError::InvalidFormat(format!(
                    "Footprint of detector {} has only {} vertices",
                    polygon.detector,
                    polygon.vertices.len()
                )));
            }
            let claimed = self.rasterize_polygon(canvas, polygon, &mut image);
            log::debug!("Detector {} claimed {} pixels", polygon.detector, claimed);
        }

        log::info!(
            "Rasterized {} detector footprints onto {}x{} canvas",
            polygons.len(),
            canvas.size,
            canvas.size
        );
        Ok(image)
    }

    /// Even-odd scanline fill of one polygon. Every edge crossing of a row is
    /// kept, so non-convex rings are handled.
    fn rasterize_polygon(
        &self,
        canvas: &TileCanvas,
        polygon: &DetectorPolygon,
        image: &mut DetectorImage,
    ) -> usize {
        let vertices = &polygon.vertices;
        let mut crossings: Vec<f64> = Vec::with_capacity(8);
        let mut claimed = 0;

        for row in 0..canvas.size {
            let y = canvas.row_center_y(row);

            crossings.clear();
            let mut j = vertices.len() - 1;
            for i in 0..vertices.len() {
                let (xi, yi) = vertices[i];
                let (xj, yj) = vertices[j];
                if (yi > y) != (yj > y) {
                    crossings.push(xj + (xi - xj) * (y - yj) / (yi - yj));
                }
                j = i;
            }
            if crossings.is_empty() {
                continue;
            }

            for col in 0..canvas.size {
                if image[[row, col]] != DETECTOR_FILL {
                    continue;
                }
                let x = canvas.col_center_x(col);
                let mut inside = false;
                for &cx in &crossings {
                    if cx > x {
                        inside = !inside;
                    }
                }
                if inside {
                    image[[row, col]] = polygon.detector;
                    claimed += 1;
                }
            }
        }

        claimed
    }

    /// Mean width of overlap runs in the first and last rows that touch
    /// neither edge column.
    pub fn estimate_overlap_width(&self, image: &DetectorImage) -> Option<f64> {
        let (nrow, ncol) = image.dim();
        if nrow == 0 || ncol == 0 {
            return None;
        }
        let rows: &[usize] = if nrow == 1 { &[0] } else { &[0, nrow - 1] };

        let mut total = 0usize;
        let mut count = 0usize;
        for &row in rows {
            for (start, end, _) in overlap_runs(image, row) {
                if start > 0 && end < ncol - 1 {
                    total += end - start + 1;
                    count += 1;
                }
            }
        }

        if count == 0 {
            None
        } else {
            Some(total as f64 / count as f64)
        }
    }

    /// Bisect every run of overlap-coded pixels into its two detectors.
    ///
    /// Returns the number of runs resolved.
    pub fn split_overlap(&self, image: &mut DetectorImage) -> usize {
        let (nrow, ncol) = image.dim();
        if ncol == 0 {
            return 0;
        }
        let width = match self.estimate_overlap_width(image) {
            Some(w) => w,
            None => self.params.overlap_prior_width as f64,
        };
        let half = (width as usize) / 2;
        log::debug!("Overlap width estimate {:.1} pixels", width);

        let mut resolved = 0;
        for row in 0..nrow {
            for (start, end, code) in overlap_runs(image, row) {
                let (left, right) = decode_overlap(code);
                let mid = if start == 0 && end < ncol - 1 {
                    // true start lies off the canvas
                    end.saturating_sub(half)
                } else if end == ncol - 1 && start > 0 {
                    (start + half).min(ncol - 1)
                } else {
                    start + (end - start + 1) / 2
                };
                for col in start..=end {
                    image[[row, col]] = if col < mid { left } else { right };
                }
                resolved += 1;
            }
        }

        if resolved > 0 {
            log::info!("Resolved {} legacy detector overlap runs", resolved);
        }
        resolved
    }

    /// Nearest-neighbor resample of a coarser detector-ID image onto the canvas
    pub fn resample_nearest(
        &self,
        source: &DetectorImage,
        source_pixel_size: f64,
        canvas: &TileCanvas,
    ) -> NbarResult<DetectorImage> {
        let (src_rows, src_cols) = source.dim();
        if src_rows == 0 || src_cols == 0 || source_pixel_size <= 0.0 {
            return Err(NbarError::InvalidFormat(format!(
                "Cannot resample {}x{} footprint image at {} m",
                src_rows, src_cols, source_pixel_size
            )));
        }
        let scale = canvas.pixel_size / source_pixel_size;
        let map = |i: usize, n: usize| ((i as f64 * scale).floor() as usize).min(n - 1);

        let rows: Vec<usize> = (0..canvas.size).map(|r| map(r, src_rows)).collect();
        let cols: Vec<usize> = (0..canvas.size).map(|c| map(c, src_cols)).collect();

        Ok(Array2::from_shape_fn(canvas.shape(), |(r, c)| {
            source[[rows[r], cols[c]]]
        }))
    }
}

/// Maximal runs `(start, end, code)` of one overlap code in a row
fn overlap_runs(image: &DetectorImage, row: usize) -> Vec<(usize, usize, u8)> {
    let line = image.row(row);
    let ncol = line.len();
    let mut runs = Vec::new();
    let mut col = 0;
    while col < ncol {
        let code = line[col];
        if !is_overlap(code) {
            col += 1;
            continue;
        }
        let start = col;
        while col + 1 < ncol && line[col + 1] == code {
            col += 1;
        }
        runs.push((start, col, code));
        col += 1;
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UtmZone;

    fn canvas(size: usize) -> TileCanvas {
        TileCanvas::new(size, 30.0, 0.0, size as f64 * 30.0, UtmZone::new(31, true))
    }

    #[test]
    fn test_overlap_codes() {
        for left in 1..DETECTOR_COUNT {
            let code = encode_overlap(left, left + 1);
            assert!(is_overlap(code));
            assert_eq!(decode_overlap(code), (left, left + 1));
        }
        assert!(!is_overlap(DETECTOR_COUNT));
    }

    #[test]
    fn test_rasterize_concave_polygon() {
        // U shape: two prongs joined along the bottom, open at the top
        let c = canvas(10);
        let poly = DetectorPolygon::new(
            3,
            vec![
                (0.0, 300.0),
                (90.0, 300.0),
                (90.0, 90.0),
                (210.0, 90.0),
                (210.0, 300.0),
                (300.0, 300.0),
                (300.0, 0.0),
                (0.0, 0.0),
            ],
        );
        let image = FootprintRasterizer::standard().rasterize(&c, &[poly]).unwrap();

        // row 0 (y=285) crosses both prongs: four crossings
        assert_eq!(image[[0, 0]], 3);
        assert_eq!(image[[0, 2]], 3);
        assert_eq!(image[[0, 3]], DETECTOR_FILL);
        assert_eq!(image[[0, 6]], DETECTOR_FILL);
        assert_eq!(image[[0, 7]], 3);
        // row 8 (y=45) is below the notch
        assert!(image.row(8).iter().all(|&d| d == 3));
    }

    #[test]
    fn test_first_claim_wins() {
        let c = canvas(4);
        let a = DetectorPolygon::new(1, vec![(0.0, 0.0), (90.0, 0.0), (90.0, 120.0), (0.0, 120.0)]);
        let b = DetectorPolygon::new(2, vec![(0.0, 0.0), (120.0, 0.0), (120.0, 120.0), (0.0, 120.0)]);
        let image = FootprintRasterizer::standard().rasterize(&c, &[a, b]).unwrap();
        assert_eq!(image[[0, 0]], 1);
        assert_eq!(image[[0, 2]], 1);
        assert_eq!(image[[0, 3]], 2);
    }

    #[test]
    fn test_rejects_bad_detector() {
        let c = canvas(4);
        let bad = DetectorPolygon::new(13, vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        assert!(FootprintRasterizer::standard().rasterize(&c, &[bad]).is_err());
    }

    #[test]
    fn test_split_interior_run() {
        let code = encode_overlap(4, 5);
        let mut image = Array2::from_elem((1, 10), 4u8);
        for col in 6..10 {
            image[[0, col]] = 5;
        }
        for col in 3..7 {
            image[[0, col]] = code;
        }
        let rasterizer = FootprintRasterizer::standard();
        assert_eq!(rasterizer.estimate_overlap_width(&image), Some(4.0));
        assert_eq!(rasterizer.split_overlap(&mut image), 1);
        assert_eq!(image.row(0).to_vec(), vec![4, 4, 4, 4, 4, 5, 5, 5, 5, 5]);
    }

    #[test]
    fn test_split_edge_runs_use_estimate() {
        let code = encode_overlap(1, 2);
        let mut image = Array2::from_elem((3, 20), DETECTOR_FILL);
        // full run of width 6 in the first row
        for col in 5..11 {
            image[[0, col]] = code;
        }
        // run cut by the left edge
        for col in 0..4 {
            image[[1, col]] = code;
        }
        // run cut by the right edge
        for col in 17..20 {
            image[[2, col]] = code;
        }
        let rasterizer = FootprintRasterizer::standard();
        assert_eq!(rasterizer.estimate_overlap_width(&image), Some(6.0));
        assert_eq!(rasterizer.split_overlap(&mut image), 3);

        // left-edge run: split 3 pixels before its end
        assert_eq!(&image.row(1).to_vec()[..4], &[2, 2, 2, 2]);
        // right-edge run: split point clamped to the last column
        assert_eq!(&image.row(2).to_vec()[17..], &[1, 1, 2]);
        assert!(image.iter().all(|&d| !is_overlap(d)));
    }

    #[test]
    fn test_split_uses_prior_without_estimate() {
        let code = encode_overlap(7, 8);
        let mut image = Array2::from_elem((1, 100), code);
        for col in 60..100 {
            image[[0, col]] = 8;
        }
        // run touches column 0 only; prior width 50 gives split at 59 - 25
        let rasterizer = FootprintRasterizer::standard();
        assert_eq!(rasterizer.estimate_overlap_width(&image), None);
        rasterizer.split_overlap(&mut image);
        assert_eq!(image[[0, 33]], 7);
        assert_eq!(image[[0, 34]], 8);
    }

    #[test]
    fn test_resample_nearest() {
        let source = Array2::from_shape_fn((2, 2), |(r, c)| (r * 2 + c + 1) as u8);
        let c = canvas(4);
        let out = FootprintRasterizer::standard()
            .resample_nearest(&source, 60.0, &c)
            .unwrap();
        assert_eq!(out[[0, 0]], 1);
        assert_eq!(out[[1, 1]], 1);
        assert_eq!(out[[0, 2]], 2);
        assert_eq!(out[[3, 3]], 4);
    }
}
