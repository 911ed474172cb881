use crate::core::projector::ProjectedSwath;
use crate::core::resample::Resampler;
use crate::types::{
    GridDefinition, ProductData, RemapError, RemapResult, ScanGeometry, SwathDefinition, SwathProduct,
};
use ndarray::Array2;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

/// Swath sample position in cell space (`[col, row]`) tagged with its
/// linear swath index (`line * samples_per_line + sample`)
pub type IndexedSample = GeomWithData<[f64; 2], usize>;

/// Nearest-neighbour parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearestParams {
    /// Search radius in grid cells
    pub distance_upper_bound: f64,
}

impl Default for NearestParams {
    fn default() -> Self {
        Self {
            distance_upper_bound: 1.0,
        }
    }
}

/// Bounding box of indexed samples in cell space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellExtent {
    pub min_row: f64,
    pub max_row: f64,
    pub min_col: f64,
    pub max_col: f64,
}

/// R-tree over the navigated swath samples that fall on one grid
///
/// Built once per (swath definition, grid) and shared by every product
/// navigated by that swath definition.
pub struct SampleIndex {
    tree: RTree<IndexedSample>,
    extent: Option<CellExtent>,
    samples_per_line: usize,
}

impl SampleIndex {
    /// Index an arbitrary set of samples
    pub fn build(samples: Vec<IndexedSample>, samples_per_line: usize) -> Self {
        let extent = samples.iter().fold(None, |extent: Option<CellExtent>, sample| {
            let [col, row] = *sample.geom();
            Some(match extent {
                None => CellExtent {
                    min_row: row,
                    max_row: row,
                    min_col: col,
                    max_col: col,
                },
                Some(e) => CellExtent {
                    min_row: e.min_row.min(row),
                    max_row: e.max_row.max(row),
                    min_col: e.min_col.min(col),
                    max_col: e.max_col.max(col),
                },
            })
        });

        Self {
            tree: RTree::bulk_load(samples),
            extent,
            samples_per_line,
        }
    }

    /// Index every projected sample that lies inside the grid coverage
    pub fn from_projected(projected: &ProjectedSwath, grid: &GridDefinition) -> Self {
        let (lines, samples_per_line) = projected.dim();
        let mut samples = Vec::with_capacity(projected.valid_count);
        for i in 0..lines {
            for j in 0..samples_per_line {
                if let Some((row, col)) = projected.cell(i, j) {
                    if grid.contains_cell(row, col) {
                        samples.push(IndexedSample::new([col, row], i * samples_per_line + j));
                    }
                }
            }
        }
        Self::build(samples, samples_per_line)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    pub fn extent(&self) -> Option<CellExtent> {
        self.extent
    }

    /// Swath (line, sample) of a linear index
    pub fn swath_position(&self, index: usize) -> (usize, usize) {
        (index / self.samples_per_line, index % self.samples_per_line)
    }

    /// Nearest accepted sample within `max_distance` cells of (row, col)
    ///
    /// Equidistant candidates resolve to the lowest linear swath index.
    pub fn nearest_within<F>(&self, row: f64, col: f64, max_distance: f64, accept: F) -> Option<usize>
    where
        F: Fn(usize) -> bool,
    {
        let max_distance_2 = max_distance * max_distance;
        let mut best: Option<(f64, usize)> = None;

        for (sample, distance_2) in self.tree.nearest_neighbor_iter_with_distance_2(&[col, row]) {
            if distance_2 > max_distance_2 {
                break;
            }
            if let Some((best_distance_2, _)) = best {
                if distance_2 > best_distance_2 {
                    break;
                }
            }
            if !accept(sample.data) {
                continue;
            }
            match best {
                Some((_, index)) if index <= sample.data => {}
                _ => best = Some((distance_2, sample.data)),
            }
        }

        best.map(|(_, index)| index)
    }
}

/// Nearest-neighbour resampler
#[derive(Debug, Clone, Default)]
pub struct NearestResampler {
    params: NearestParams,
}

impl NearestResampler {
    pub fn new(params: NearestParams) -> Self {
        Self { params }
    }

    /// Output values for grid row `row`, columns `col_start..=col_end`
    fn query_row(
        &self,
        index: &SampleIndex,
        product: &SwathProduct,
        row: usize,
        col_start: usize,
        col_end: usize,
        fill_value: f32,
    ) -> Vec<f32> {
        let bound = self.params.distance_upper_bound;
        let accept = |sample: usize| {
            let (i, j) = index.swath_position(sample);
            !product.is_fill(product.data[[i, j]])
        };

        (col_start..=col_end)
            .map(|col| {
                match index.nearest_within(row as f64, col as f64, bound, accept) {
                    Some(sample) => {
                        let (i, j) = index.swath_position(sample);
                        product.data[[i, j]]
                    }
                    None => fill_value,
                }
            })
            .collect()
    }
}

/// Inclusive cell range reachable from `[min, max]` within `bound`, clipped to `0..len`
fn reachable_range(min: f64, max: f64, bound: f64, len: usize) -> Option<(usize, usize)> {
    let start = (min - bound).ceil().max(0.0);
    let end = (max + bound).floor().min(len as f64 - 1.0);
    if end < start {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

impl Resampler for NearestResampler {
    type Geometry = SampleIndex;

    fn method_name(&self) -> &'static str {
        "nearest"
    }

    fn validate(&self, _scan_geometry: &ScanGeometry) -> RemapResult<()> {
        let bound = self.params.distance_upper_bound;
        if !(bound.is_finite() && bound > 0.0) {
            return Err(RemapError::InvalidGeometryParameter(format!(
                "distance_upper_bound must be positive, got {}",
                bound
            )));
        }
        Ok(())
    }

    fn prepare(
        &self,
        swath: &SwathDefinition,
        projected: &ProjectedSwath,
        grid: &GridDefinition,
        _scan_geometry: &ScanGeometry,
    ) -> RemapResult<SampleIndex> {
        let index = SampleIndex::from_projected(projected, grid);
        log::debug!(
            "Indexed {} of {} samples from swath '{}' on grid '{}'",
            index.len(),
            projected.valid_count,
            swath.swath_name,
            grid.grid_name
        );
        Ok(index)
    }

    fn resample(
        &self,
        index: &SampleIndex,
        product: &SwathProduct,
        grid: &GridDefinition,
        fill_value: f32,
    ) -> RemapResult<ProductData> {
        let (rows, cols) = grid.shape();
        let mut output = Array2::from_elem((rows, cols), fill_value);

        let Some(extent) = index.extent() else {
            return Ok(output);
        };
        let bound = self.params.distance_upper_bound;
        let (Some((row_start, row_end)), Some((col_start, col_end))) = (
            reachable_range(extent.min_row, extent.max_row, bound, rows),
            reachable_range(extent.min_col, extent.max_col, bound, cols),
        ) else {
            return Ok(output);
        };

        let grid_rows: Vec<usize> = (row_start..=row_end).collect();

        #[cfg(feature = "parallel")]
        let row_values: Vec<Vec<f32>> = grid_rows
            .par_iter()
            .map(|&row| self.query_row(index, product, row, col_start, col_end, fill_value))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let row_values: Vec<Vec<f32>> = grid_rows
            .iter()
            .map(|&row| self.query_row(index, product, row, col_start, col_end, fill_value))
            .collect();

        for (row, values) in grid_rows.into_iter().zip(row_values) {
            for (offset, value) in values.into_iter().enumerate() {
                output[[row, col_start + offset]] = value;
            }
        }

        Ok(output)
    }
}
