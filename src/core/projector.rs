use crate::types::{GridDefinition, RemapError, RemapResult, SwathDefinition};
use ndarray::Array2;
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Geographic coordinates the navigation arrays are expressed in
const SOURCE_PROJ4: &str = "+proj=longlat +ellps=WGS84 +no_defs";

/// How lon/lat reach the grid's planar coordinates
enum ProjectionStrategy {
    /// Lat/lon grids: planar coordinates are the degrees themselves
    Identity,
    /// Any other PROJ.4 projection
    Proj4rs { source: Box<Proj>, target: Box<Proj> },
}

impl ProjectionStrategy {
    fn for_grid(grid: &GridDefinition) -> RemapResult<Self> {
        if grid.is_geographic() {
            return Ok(Self::Identity);
        }

        let source = Proj::from_proj_string(SOURCE_PROJ4)
            .map_err(|e| RemapError::InvalidGrid(format!("invalid source projection: {:?}", e)))?;
        let target = Proj::from_proj_string(&grid.proj4_definition).map_err(|e| {
            RemapError::InvalidGrid(format!(
                "grid '{}': invalid projection '{}': {:?}",
                grid.grid_name, grid.proj4_definition, e
            ))
        })?;

        Ok(Self::Proj4rs {
            source: Box::new(source),
            target: Box::new(target),
        })
    }
}

/// Maps geographic coordinates onto one grid's fractional cell space
pub struct Projector {
    grid: GridDefinition,
    strategy: ProjectionStrategy,
}

impl std::fmt::Debug for Projector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projector")
            .field("grid", &self.grid.grid_name)
            .field("identity", &matches!(self.strategy, ProjectionStrategy::Identity))
            .finish()
    }
}

/// Swath navigation projected into fractional grid cells
///
/// Samples with missing navigation or a failed projection hold NaN.
#[derive(Debug, Clone)]
pub struct ProjectedSwath {
    pub rows: Array2<f64>,
    pub cols: Array2<f64>,
    pub valid_count: usize,
    pub failed_count: usize,
}

impl ProjectedSwath {
    /// Fractional (row, col) of a swath sample, if it has one
    pub fn cell(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        let r = self.rows[[row, col]];
        let c = self.cols[[row, col]];
        if r.is_finite() && c.is_finite() {
            Some((r, c))
        } else {
            None
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.rows.dim()
    }
}

impl Projector {
    /// Build the coordinate transform for a grid
    pub fn new(grid: &GridDefinition) -> RemapResult<Self> {
        grid.validate()?;
        let strategy = ProjectionStrategy::for_grid(grid)?;
        Ok(Self {
            grid: grid.clone(),
            strategy,
        })
    }

    pub fn grid(&self) -> &GridDefinition {
        &self.grid
    }

    /// Project lon/lat (degrees) to planar grid coordinates
    ///
    /// Non-finite input propagates as NaN; a transform failure on finite
    /// input is a `Projection` error.
    pub fn project(&self, lon: f64, lat: f64) -> RemapResult<(f64, f64)> {
        if !lon.is_finite() || !lat.is_finite() {
            return Ok((f64::NAN, f64::NAN));
        }
        if lat.abs() > 90.0 {
            return Err(RemapError::Projection(format!(
                "latitude {} is outside [-90, 90]",
                lat
            )));
        }

        match &self.strategy {
            ProjectionStrategy::Identity => Ok((lon, lat)),
            ProjectionStrategy::Proj4rs { source, target } => {
                let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
                transform(source, target, &mut point).map_err(|e| {
                    RemapError::Projection(format!(
                        "({}, {}) on grid '{}': {:?}",
                        lon, lat, self.grid.grid_name, e
                    ))
                })?;
                if !point.0.is_finite() || !point.1.is_finite() {
                    return Err(RemapError::Projection(format!(
                        "({}, {}) has no finite position on grid '{}'",
                        lon, lat, self.grid.grid_name
                    )));
                }
                Ok((point.0, point.1))
            }
        }
    }

    /// Planar coordinates to fractional (row, col); never clips
    pub fn to_cell(&self, x: f64, y: f64) -> (f64, f64) {
        let row = (y - self.grid.y0) / self.grid.dy;
        let col = (x - self.grid.x0) / self.grid.dx;
        (row, col)
    }

    pub fn lonlat_to_cell(&self, lon: f64, lat: f64) -> RemapResult<(f64, f64)> {
        let (x, y) = self.project(lon, lat)?;
        Ok(self.to_cell(x, y))
    }

    /// Project every navigation sample of a swath
    ///
    /// Per-sample projection failures are swallowed into NaN.
    pub fn project_swath(&self, swath: &SwathDefinition) -> ProjectedSwath {
        let dim = swath.dim();
        let mut rows = Array2::from_elem(dim, f64::NAN);
        let mut cols = Array2::from_elem(dim, f64::NAN);
        let mut valid_count = 0;
        let mut failed_count = 0;

        for i in 0..dim.0 {
            for j in 0..dim.1 {
                let Some((lon, lat)) = swath.location(i, j) else {
                    continue;
                };
                match self.lonlat_to_cell(lon, lat) {
                    Ok((row, col)) => {
                        rows[[i, j]] = row;
                        cols[[i, j]] = col;
                        valid_count += 1;
                    }
                    Err(e) => {
                        if failed_count == 0 {
                            log::debug!("First projection failure in swath '{}': {}", swath.swath_name, e);
                        }
                        failed_count += 1;
                    }
                }
            }
        }

        if failed_count > 0 {
            log::debug!(
                "Swath '{}' on grid '{}': {} samples failed to project",
                swath.swath_name,
                self.grid.grid_name,
                failed_count
            );
        }
        log::debug!(
            "Projected swath '{}' onto grid '{}': {}/{} samples navigated",
            swath.swath_name,
            self.grid.grid_name,
            valid_count,
            dim.0 * dim.1
        );

        ProjectedSwath {
            rows,
            cols,
            valid_count,
            failed_count,
        }
    }
}

/// Project a single lon/lat point with an arbitrary PROJ.4 string
pub fn project_lonlat(proj4_definition: &str, lon: f64, lat: f64) -> RemapResult<(f64, f64)> {
    let grid = GridDefinition {
        grid_name: "<adhoc>".to_string(),
        proj4_definition: proj4_definition.to_string(),
        x0: 0.0,
        y0: 0.0,
        dx: 1.0,
        dy: 1.0,
        rows: 1,
        cols: 1,
    };
    Projector::new(&grid)?.project(lon, lat)
}
