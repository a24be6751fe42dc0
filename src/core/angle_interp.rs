//! Two-pass reconstruction of dense angle rasters from a sparse sample grid.
//!
//! Pass 1 fills each sampled row across the full canvas width using only the
//! original samples of that row. Pass 2 fills every canvas column from the
//! rows produced by pass 1. Beyond the outermost samples both passes
//! extrapolate linearly from the two nearest samples.

use crate::types::{AngleImage, TileCanvas, ANGLE_FILL, ANGLE_SCALE};
use ndarray::{Array2, ArrayView1, ArrayViewMut1, Zip};
use serde::{Deserialize, Serialize};

/// Nominal layout of the coarse angle grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngleGridLayout {
    /// Distance between samples in meters
    pub sample_spacing: f64,
    /// Samples per side
    pub grid_size: usize,
}

impl Default for AngleGridLayout {
    fn default() -> Self {
        Self {
            sample_spacing: 5000.0,
            grid_size: 23,
        }
    }
}

/// Coarse grid of angle samples in hundredths of a degree
#[derive(Debug, Clone, PartialEq)]
pub struct SparseAngleGrid {
    pub values: Array2<u16>,
    /// Northing distance between sample rows in meters
    pub row_step: f64,
    /// Easting distance between sample columns in meters
    pub col_step: f64,
}

impl SparseAngleGrid {
    pub fn new(values: Array2<u16>, row_step: f64, col_step: f64) -> Self {
        Self {
            values,
            row_step,
            col_step,
        }
    }

    /// Grid with every sample missing
    pub fn missing(layout: &AngleGridLayout) -> Self {
        Self::new(
            Array2::from_elem((layout.grid_size, layout.grid_size), ANGLE_FILL),
            layout.sample_spacing,
            layout.sample_spacing,
        )
    }

    /// Build a grid from a function of `(row, col)` returning degrees
    pub fn from_degrees<F>(layout: &AngleGridLayout, f: F) -> Self
    where
        F: Fn(usize, usize) -> Option<f64>,
    {
        let values = Array2::from_shape_fn((layout.grid_size, layout.grid_size), |(r, c)| {
            f(r, c).map_or(ANGLE_FILL, to_fixed)
        });
        Self::new(values, layout.sample_spacing, layout.sample_spacing)
    }

    /// Number of usable samples; zero when the grid has no step
    pub fn valid_count(&self) -> usize {
        if self.row_step <= 0.0 || self.col_step <= 0.0 {
            return 0;
        }
        self.values.iter().filter(|&&v| v != ANGLE_FILL).count()
    }

    pub fn is_available(&self) -> bool {
        self.valid_count() > 0
    }
}

/// Canvas row/column of coarse sample `index`, clamped to the last pixel
pub fn index_to_pixel(index: usize, spacing: f64, pixel_size: f64, n: usize) -> usize {
    let pixel = (index as f64 * spacing / pixel_size).floor() as usize;
    pixel.min(n.saturating_sub(1))
}

/// Degrees to hundredths of a degree, kept clear of the fill value
pub fn to_fixed(degrees: f64) -> u16 {
    fixed_from_scaled(degrees * ANGLE_SCALE)
}

fn fixed_from_scaled(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(ANGLE_FILL - 1)) as u16
}

/// Value at `x` from samples sorted by position.
///
/// Between samples: linear interpolation between the nearest neighbors.
/// Outside the envelope: extrapolation from the two outermost samples.
/// A single sample is broadcast.
pub(crate) fn interpolate_line(samples: &[(f64, f64)], x: f64) -> f64 {
    let n = samples.len();
    if n == 1 {
        return samples[0].1;
    }

    // first sample at or beyond x
    let upper = samples.partition_point(|&(pos, _)| pos < x);
    let (lo, hi) = if upper == 0 {
        (0, 1)
    } else if upper == n {
        (n - 2, n - 1)
    } else if samples[upper].0 == x {
        return samples[upper].1;
    } else {
        (upper - 1, upper)
    };

    let (x0, v0) = samples[lo];
    let (x1, v1) = samples[hi];
    if x1 == x0 {
        return v0;
    }
    v0 + (v1 - v0) * (x - x0) / (x1 - x0)
}

/// Reconstruct a dense angle raster on `canvas` from a sparse grid.
///
/// Returns `None` when the grid has no usable sample.
pub fn reconstruct(grid: &SparseAngleGrid, canvas: &TileCanvas) -> Option<AngleImage> {
    if !grid.is_available() {
        return None;
    }

    let n = canvas.size;
    let (grid_rows, grid_cols) = grid.values.dim();
    let row_pos: Vec<f64> = (0..grid_rows)
        .map(|i| index_to_pixel(i, grid.row_step, canvas.pixel_size, n) as f64)
        .collect();
    let col_pos: Vec<f64> = (0..grid_cols)
        .map(|j| index_to_pixel(j, grid.col_step, canvas.pixel_size, n) as f64)
        .collect();

    // Pass 1: coarse rows across every canvas column, NaN where unfilled
    let mut coarse = Array2::<f64>::from_elem((grid_rows, n), f64::NAN);
    let mut samples: Vec<(f64, f64)> = Vec::with_capacity(grid_cols);
    for (r, values) in grid.values.rows().into_iter().enumerate() {
        samples.clear();
        samples.extend(
            values
                .iter()
                .zip(&col_pos)
                .filter(|&(&v, _)| v != ANGLE_FILL)
                .map(|(&v, &pos)| (pos, f64::from(v))),
        );
        if samples.is_empty() {
            continue;
        }
        for (col, out) in coarse.row_mut(r).iter_mut().enumerate() {
            *out = interpolate_line(&samples, col as f64);
        }
    }

    // Pass 2: down every canvas column
    let mut dense = Array2::from_elem(canvas.shape(), ANGLE_FILL);
    let fill_column = |mut out: ArrayViewMut1<u16>, column: ArrayView1<f64>| {
        let samples: Vec<(f64, f64)> = column
            .iter()
            .zip(&row_pos)
            .filter(|(v, _)| !v.is_nan())
            .map(|(&v, &pos)| (pos, v))
            .collect();
        if samples.is_empty() {
            return;
        }
        for (row, value) in out.iter_mut().enumerate() {
            *value = fixed_from_scaled(interpolate_line(&samples, row as f64));
        }
    };

    let zip = Zip::from(dense.columns_mut()).and(coarse.columns());
    #[cfg(feature = "parallel")]
    zip.par_for_each(fill_column);
    #[cfg(not(feature = "parallel"))]
    zip.for_each(fill_column);

    Some(dense)
}
