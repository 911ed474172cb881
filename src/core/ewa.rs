use crate::core::projector::ProjectedSwath;
use crate::core::resample::Resampler;
use crate::types::{
    GridDefinition, ProductData, RemapError, RemapResult, ScanGeometry, SwathDefinition, SwathProduct,
};
use ndarray::{s, Array2, Zip};
use serde::{Deserialize, Serialize};

/// Floor on the footprint radius at `fornav_D = 1`, in grid cells
///
/// Larger than half a cell diagonal, so at the nominal diameter every
/// footprint holds at least one cell center with non-zero weight.
pub const MIN_FOOTPRINT_RADIUS: f64 = 0.75;

/// Elliptical weighted averaging parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EwaParams {
    /// Footprint diameter relative to the IFOV, both axes (`fornav_D`)
    #[serde(rename = "fornav_D")]
    pub footprint_diameter: f64,
    /// Extra along-scan elongation (`fornav_d`)
    #[serde(rename = "fornav_d")]
    pub footprint_scale: f64,
    /// Largest footprint half-extent in grid cells; wider ellipses are
    /// shrunk uniformly to fit
    pub max_extent: f64,
    /// Gaussian weight reached at the ellipse boundary before truncation
    pub weight_min: f64,
}

impl Default for EwaParams {
    fn default() -> Self {
        Self {
            footprint_diameter: 1.0,
            footprint_scale: 1.0,
            max_extent: 40.0,
            weight_min: 0.01,
        }
    }
}

/// Truncated Gaussian falloff over normalized elliptical distance `q`
///
/// `w(0) = 1`, `w(1) = 0`, strictly decreasing in between, zero outside.
#[derive(Debug, Clone, Copy)]
pub struct WeightCurve {
    alpha: f64,
    weight_min: f64,
}

impl WeightCurve {
    pub fn new(weight_min: f64) -> Self {
        Self {
            alpha: -weight_min.ln(),
            weight_min,
        }
    }

    #[inline]
    pub fn weight(&self, q: f64) -> f64 {
        if !(0.0..1.0).contains(&q) {
            return 0.0;
        }
        ((-self.alpha * q).exp() - self.weight_min) / (1.0 - self.weight_min)
    }
}

/// One sample's ellipse in grid cell space
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    pub row: f64,
    pub col: f64,
    /// Inverse footprint covariance, (col, row) ordering
    inv_xx: f64,
    inv_xy: f64,
    inv_yy: f64,
    /// Candidate cells, inclusive, already clipped to the grid
    row_start: usize,
    row_end: usize,
    col_start: usize,
    col_end: usize,
}

impl Footprint {
    /// Normalized elliptical distance of a cell offset; the ellipse is `q < 1`
    #[inline]
    pub fn q(&self, d_col: f64, d_row: f64) -> f64 {
        self.inv_xx * d_col * d_col + 2.0 * self.inv_xy * d_col * d_row + self.inv_yy * d_row * d_row
    }

    pub fn candidate_rows(&self) -> std::ops::RangeInclusive<usize> {
        self.row_start..=self.row_end
    }

    pub fn candidate_cols(&self) -> std::ops::RangeInclusive<usize> {
        self.col_start..=self.col_end
    }

    fn window(&self) -> Window {
        Window {
            row_start: self.row_start,
            row_end: self.row_end,
            col_start: self.col_start,
            col_end: self.col_end,
        }
    }
}

/// Footprints of every navigated swath sample touching one grid
pub struct EwaGeometry {
    /// (linear swath index, footprint)
    footprints: Vec<(usize, Footprint)>,
    samples_per_line: usize,
}

impl EwaGeometry {
    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    /// Footprint of swath sample (line, sample), if it touches the grid
    pub fn footprint(&self, line: usize, sample: usize) -> Option<&Footprint> {
        let index = line * self.samples_per_line + sample;
        self.footprints
            .binary_search_by_key(&index, |(i, _)| *i)
            .ok()
            .map(|k| &self.footprints[k].1)
    }
}

/// Scan-geometry-aware elliptical weighted averaging
#[derive(Debug, Clone, Default)]
pub struct EwaResampler {
    params: EwaParams,
}

/// Cell-space derivative (d_row, d_col) from neighbouring projected samples
fn derivative(
    projected: &ProjectedSwath,
    here: (f64, f64),
    prev: Option<(usize, usize)>,
    next: Option<(usize, usize)>,
) -> (f64, f64) {
    let prev = prev.and_then(|(i, j)| projected.cell(i, j));
    let next = next.and_then(|(i, j)| projected.cell(i, j));
    match (prev, next) {
        (Some(p), Some(n)) => ((n.0 - p.0) / 2.0, (n.1 - p.1) / 2.0),
        (None, Some(n)) => (n.0 - here.0, n.1 - here.1),
        (Some(p), None) => (here.0 - p.0, here.1 - p.1),
        (None, None) => (0.0, 0.0),
    }
}

/// Inclusive index range covered by `center ± half`, clipped to `0..len`
fn clipped_range(center: f64, half: f64, len: usize) -> Option<(usize, usize)> {
    let start = (center - half).ceil().max(0.0);
    let end = (center + half).floor().min(len as f64 - 1.0);
    if end < start {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

impl EwaResampler {
    pub fn new(params: EwaParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EwaParams {
        &self.params
    }

    /// Build the footprint of sample (i, j) from its local Jacobian
    fn footprint(
        &self,
        swath: &SwathDefinition,
        projected: &ProjectedSwath,
        grid: &GridDefinition,
        scan_geometry: &ScanGeometry,
        i: usize,
        j: usize,
    ) -> Option<Footprint> {
        let here = projected.cell(i, j)?;
        let (lines, samples) = projected.dim();

        let along_scan = derivative(
            projected,
            here,
            j.checked_sub(1).map(|jj| (i, jj)),
            (j + 1 < samples).then_some((i, j + 1)),
        );

        // Along-track neighbours stay inside the scan the line belongs to
        let (scan_start, scan_end) = if swath.rows_per_scan > 1 {
            let start = (i / swath.rows_per_scan) * swath.rows_per_scan;
            (start, (start + swath.rows_per_scan).min(lines))
        } else {
            (0, lines)
        };
        let along_track = derivative(
            projected,
            here,
            (i > scan_start).then(|| (i - 1, j)),
            (i + 1 < scan_end).then_some((i + 1, j)),
        );

        let diameter = self.params.footprint_diameter;
        let ka = 0.5 * scan_geometry.ifov_along_scan * self.params.footprint_scale * diameter;
        let kb = 0.5 * scan_geometry.ifov_along_track * diameter;
        let (a_row, a_col) = (along_scan.0 * ka, along_scan.1 * ka);
        let (b_row, b_col) = (along_track.0 * kb, along_track.1 * kb);

        let r_min = MIN_FOOTPRINT_RADIUS * diameter;
        let r2 = r_min * r_min;
        let mut s_xx = a_col * a_col + b_col * b_col + r2;
        let mut s_yy = a_row * a_row + b_row * b_row + r2;
        let mut s_xy = a_col * a_row + b_col * b_row;

        // Oversized ellipses keep their shape; the bounding box must still
        // contain the whole ellipse
        let widest = s_xx.max(s_yy).sqrt();
        if widest > self.params.max_extent {
            let shrink = (self.params.max_extent / widest).powi(2);
            s_xx *= shrink;
            s_yy *= shrink;
            s_xy *= shrink;
        }

        let det = s_xx * s_yy - s_xy * s_xy;
        if !(det.is_finite() && det > 0.0) {
            return None;
        }

        let half_cols = s_xx.sqrt();
        let half_rows = s_yy.sqrt();
        let (row_start, row_end) = clipped_range(here.0, half_rows, grid.rows)?;
        let (col_start, col_end) = clipped_range(here.1, half_cols, grid.cols)?;

        Some(Footprint {
            row: here.0,
            col: here.1,
            inv_xx: s_yy / det,
            inv_xy: -s_xy / det,
            inv_yy: s_xx / det,
            row_start,
            row_end,
            col_start,
            col_end,
        })
    }

    /// Weighted sums and total weights for one product, in `f64`
    ///
    /// The buffers only span the cells reached by valid samples.
    pub fn accumulate(&self, geometry: &EwaGeometry, product: &SwathProduct) -> Accumulation {
        let curve = WeightCurve::new(self.params.weight_min);
        let valid: Vec<(f64, &Footprint)> = geometry
            .footprints
            .iter()
            .filter_map(|(index, footprint)| {
                let value = product.data[[index / geometry.samples_per_line, index % geometry.samples_per_line]];
                (!product.is_fill(value)).then_some((value as f64, footprint))
            })
            .collect();

        let Some(window) = valid.iter().map(|(_, f)| f.window()).reduce(Window::union) else {
            return Accumulation::empty();
        };

        let shape = (window.row_end - window.row_start + 1, window.col_end - window.col_start + 1);
        let mut sums = Array2::<f64>::zeros(shape);
        let mut weights = Array2::<f64>::zeros(shape);

        for (value, footprint) in valid {
            for row in footprint.candidate_rows() {
                let d_row = row as f64 - footprint.row;
                for col in footprint.candidate_cols() {
                    let d_col = col as f64 - footprint.col;
                    let w = curve.weight(footprint.q(d_col, d_row));
                    if w > 0.0 {
                        let cell = [row - window.row_start, col - window.col_start];
                        sums[cell] += w * value;
                        weights[cell] += w;
                    }
                }
            }
        }

        Accumulation {
            row_start: window.row_start,
            col_start: window.col_start,
            sums,
            weights,
        }
    }
}

/// Inclusive cell window
#[derive(Debug, Clone, Copy)]
struct Window {
    row_start: usize,
    row_end: usize,
    col_start: usize,
    col_end: usize,
}

impl Window {
    fn union(self, other: Window) -> Window {
        Window {
            row_start: self.row_start.min(other.row_start),
            row_end: self.row_end.max(other.row_end),
            col_start: self.col_start.min(other.col_start),
            col_end: self.col_end.max(other.col_end),
        }
    }
}

/// Accumulation buffers over a window of the grid
#[derive(Debug, Clone)]
pub struct Accumulation {
    pub row_start: usize,
    pub col_start: usize,
    pub sums: Array2<f64>,
    pub weights: Array2<f64>,
}

impl Accumulation {
    fn empty() -> Self {
        Self {
            row_start: 0,
            col_start: 0,
            sums: Array2::zeros((0, 0)),
            weights: Array2::zeros((0, 0)),
        }
    }

    fn local(&self, row: usize, col: usize) -> Option<[usize; 2]> {
        let r = row.checked_sub(self.row_start)?;
        let c = col.checked_sub(self.col_start)?;
        let (rows, cols) = self.weights.dim();
        (r < rows && c < cols).then_some([r, c])
    }

    /// Total weight of a grid cell; zero outside the window
    pub fn weight(&self, row: usize, col: usize) -> f64 {
        self.local(row, col).map_or(0.0, |cell| self.weights[cell])
    }

    pub fn sum(&self, row: usize, col: usize) -> f64 {
        self.local(row, col).map_or(0.0, |cell| self.sums[cell])
    }
}

impl Resampler for EwaResampler {
    type Geometry = EwaGeometry;

    fn method_name(&self) -> &'static str {
        "ewa"
    }

    fn validate(&self, scan_geometry: &ScanGeometry) -> RemapResult<()> {
        scan_geometry.validate()?;
        for (name, value) in [
            ("fornav_D", self.params.footprint_diameter),
            ("fornav_d", self.params.footprint_scale),
            ("max_extent", self.params.max_extent),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RemapError::InvalidGeometryParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(self.params.weight_min > 0.0 && self.params.weight_min < 1.0) {
            return Err(RemapError::InvalidGeometryParameter(format!(
                "weight_min must be in (0, 1), got {}",
                self.params.weight_min
            )));
        }
        Ok(())
    }

    fn prepare(
        &self,
        swath: &SwathDefinition,
        projected: &ProjectedSwath,
        grid: &GridDefinition,
        scan_geometry: &ScanGeometry,
    ) -> RemapResult<EwaGeometry> {
        let (lines, samples_per_line) = projected.dim();
        let mut footprints = Vec::with_capacity(projected.valid_count);
        for i in 0..lines {
            for j in 0..samples_per_line {
                if let Some(footprint) = self.footprint(swath, projected, grid, scan_geometry, i, j) {
                    footprints.push((i * samples_per_line + j, footprint));
                }
            }
        }

        log::debug!(
            "Built {} EWA footprints from swath '{}' on grid '{}'",
            footprints.len(),
            swath.swath_name,
            grid.grid_name
        );

        Ok(EwaGeometry {
            footprints,
            samples_per_line,
        })
    }

    fn resample(
        &self,
        geometry: &EwaGeometry,
        product: &SwathProduct,
        grid: &GridDefinition,
        fill_value: f32,
    ) -> RemapResult<ProductData> {
        let accumulation = self.accumulate(geometry, product);

        let mut output = Array2::from_elem(grid.shape(), fill_value);
        let (rows, cols) = accumulation.weights.dim();
        if rows == 0 || cols == 0 {
            return Ok(output);
        }
        let (r0, c0) = (accumulation.row_start, accumulation.col_start);
        Zip::from(output.slice_mut(s![r0..r0 + rows, c0..c0 + cols]))
            .and(&accumulation.sums)
            .and(&accumulation.weights)
            .for_each(|out, &sum, &weight| {
                if weight > 0.0 {
                    *out = (sum / weight) as f32;
                }
            });

        Ok(output)
    }
}
