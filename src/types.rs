use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Physical measurement values, in swath or grid layout
pub type ProductData = Array2<f32>;

/// Per-pixel geolocation (degrees), in swath layout
pub type NavigationData = Array2<f64>;

/// Instrument footprint shape used to size EWA ellipses
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanGeometry {
    /// Instantaneous field of view along the scan, in sample spacings
    pub ifov_along_scan: f64,
    /// Instantaneous field of view along the track, in line spacings
    pub ifov_along_track: f64,
}

impl Default for ScanGeometry {
    fn default() -> Self {
        Self {
            ifov_along_scan: 1.0,
            ifov_along_track: 1.0,
        }
    }
}

impl ScanGeometry {
    /// Both footprint dimensions must be finite and strictly positive
    pub fn validate(&self) -> RemapResult<()> {
        for (name, value) in [
            ("ifov_along_scan", self.ifov_along_scan),
            ("ifov_along_track", self.ifov_along_track),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RemapError::InvalidGeometryParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// Navigation shared by one or more swath products
#[derive(Debug, Clone)]
pub struct SwathDefinition {
    pub swath_name: String,
    pub longitude: NavigationData,
    pub latitude: NavigationData,
    /// Navigation fill value (NaN or a sentinel such as -999.0)
    pub fill_value: f64,
    /// Detector lines swept by a single scan
    pub rows_per_scan: usize,
}

impl SwathDefinition {
    /// Create a swath definition, checking that longitude and latitude agree
    pub fn new(
        swath_name: impl Into<String>,
        longitude: NavigationData,
        latitude: NavigationData,
        fill_value: f64,
        rows_per_scan: usize,
    ) -> RemapResult<Self> {
        let swath_name = swath_name.into();
        if longitude.dim() != latitude.dim() {
            return Err(RemapError::InvalidSwath(format!(
                "swath '{}': longitude shape {:?} does not match latitude shape {:?}",
                swath_name,
                longitude.dim(),
                latitude.dim()
            )));
        }
        if longitude.is_empty() {
            return Err(RemapError::InvalidSwath(format!(
                "swath '{}' has no navigation samples",
                swath_name
            )));
        }
        if rows_per_scan == 0 {
            return Err(RemapError::InvalidSwath(format!(
                "swath '{}': rows_per_scan must be at least 1",
                swath_name
            )));
        }

        Ok(Self {
            swath_name,
            longitude,
            latitude,
            fill_value,
            rows_per_scan,
        })
    }

    /// (scan lines, samples per line)
    pub fn dim(&self) -> (usize, usize) {
        self.longitude.dim()
    }

    /// Navigation for one sample, or `None` when it is fill or non-finite
    pub fn location(&self, row: usize, col: usize) -> Option<(f64, f64)> {
        let lon = self.longitude[[row, col]];
        let lat = self.latitude[[row, col]];
        if self.is_fill(lon) || self.is_fill(lat) {
            None
        } else {
            Some((lon, lat))
        }
    }

    fn is_fill(&self, value: f64) -> bool {
        !value.is_finite() || (!self.fill_value.is_nan() && value == self.fill_value)
    }
}

/// One named swath product as delivered by a frontend
#[derive(Debug, Clone)]
pub struct SwathProduct {
    pub product_name: String,
    pub description: String,
    pub units: String,
    pub satellite: String,
    pub instrument: String,
    pub data_kind: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Name of the swath definition navigating this product
    pub swath_name: String,
    pub fill_value: f32,
    pub data: ProductData,
}

impl SwathProduct {
    /// Create a product with empty descriptive metadata
    pub fn new(
        product_name: impl Into<String>,
        swath_name: impl Into<String>,
        data: ProductData,
        fill_value: f32,
        begin_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            description: String::new(),
            units: String::new(),
            satellite: String::new(),
            instrument: String::new(),
            data_kind: String::new(),
            begin_time,
            end_time,
            swath_name: swath_name.into(),
            fill_value,
            data,
        }
    }

    /// True when `value` carries no measurement for this product
    pub fn is_fill(&self, value: f32) -> bool {
        is_invalid_value(value, self.fill_value)
    }
}

/// Swath products plus the navigation they share
#[derive(Debug, Clone, Default)]
pub struct SwathScene {
    swath_definitions: BTreeMap<String, SwathDefinition>,
    products: BTreeMap<String, SwathProduct>,
    pub scan_geometry: ScanGeometry,
}

impl SwathScene {
    pub fn new(scan_geometry: ScanGeometry) -> Self {
        Self {
            swath_definitions: BTreeMap::new(),
            products: BTreeMap::new(),
            scan_geometry,
        }
    }

    pub fn add_swath_definition(&mut self, definition: SwathDefinition) -> RemapResult<()> {
        if self.swath_definitions.contains_key(&definition.swath_name) {
            return Err(RemapError::InvalidSwath(format!(
                "swath '{}' is already defined in this scene",
                definition.swath_name
            )));
        }
        self.swath_definitions
            .insert(definition.swath_name.clone(), definition);
        Ok(())
    }

    /// Add a product; its array must match the shape of its navigation
    pub fn add_product(&mut self, product: SwathProduct) -> RemapResult<()> {
        let definition = self
            .swath_definitions
            .get(&product.swath_name)
            .ok_or_else(|| {
                RemapError::InvalidSwath(format!(
                    "product '{}' references unknown swath '{}'",
                    product.product_name, product.swath_name
                ))
            })?;

        if product.data.dim() != definition.dim() {
            return Err(RemapError::InvalidSwath(format!(
                "product '{}' has shape {:?} but swath '{}' has shape {:?}",
                product.product_name,
                product.data.dim(),
                definition.swath_name,
                definition.dim()
            )));
        }

        if self.products.contains_key(&product.product_name) {
            log::warn!("Replacing swath product '{}'", product.product_name);
        }
        self.products.insert(product.product_name.clone(), product);
        Ok(())
    }

    pub fn swath_definition(&self, swath_name: &str) -> Option<&SwathDefinition> {
        self.swath_definitions.get(swath_name)
    }

    pub fn swath_definitions(&self) -> impl Iterator<Item = &SwathDefinition> {
        self.swath_definitions.values()
    }

    pub fn product(&self, product_name: &str) -> Option<&SwathProduct> {
        self.products.get(product_name)
    }

    pub fn products(&self) -> impl Iterator<Item = &SwathProduct> {
        self.products.values()
    }

    pub fn product_names(&self) -> Vec<String> {
        self.products.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Earliest product begin time
    pub fn begin_time(&self) -> Option<DateTime<Utc>> {
        self.products.values().map(|p| p.begin_time).min()
    }

    /// Latest product end time
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.products.values().map(|p| p.end_time).max()
    }
}

/// A fixed raster on a map projection
///
/// `(x0, y0)` is the projected position of the center of the upper-left
/// cell, so cell `(r, c)` is centered on `(x0 + c * dx, y0 + r * dy)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    pub grid_name: String,
    /// PROJ.4 projection string
    pub proj4_definition: String,
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
    pub rows: usize,
    pub cols: usize,
}

impl GridDefinition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grid_name: impl Into<String>,
        proj4_definition: impl Into<String>,
        x0: f64,
        y0: f64,
        dx: f64,
        dy: f64,
        rows: usize,
        cols: usize,
    ) -> RemapResult<Self> {
        let grid = Self {
            grid_name: grid_name.into(),
            proj4_definition: proj4_definition.into(),
            x0,
            y0,
            dx,
            dy,
            rows,
            cols,
        };
        grid.validate()?;
        Ok(grid)
    }

    pub fn validate(&self) -> RemapResult<()> {
        if !(self.dx.is_finite() && self.dy.is_finite()) || self.dx == 0.0 || self.dy == 0.0 {
            return Err(RemapError::InvalidGrid(format!(
                "grid '{}': cell size must be finite and non-zero, got ({}, {})",
                self.grid_name, self.dx, self.dy
            )));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(RemapError::InvalidGrid(format!(
                "grid '{}': rows and cols must be positive, got {}x{}",
                self.grid_name, self.rows, self.cols
            )));
        }
        if !(self.x0.is_finite() && self.y0.is_finite()) {
            return Err(RemapError::InvalidGrid(format!(
                "grid '{}': origin must be finite",
                self.grid_name
            )));
        }
        if self.proj4_definition.trim().is_empty() {
            return Err(RemapError::InvalidGrid(format!(
                "grid '{}' has an empty projection",
                self.grid_name
            )));
        }
        Ok(())
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// True for lat/lon grids whose planar units are degrees
    pub fn is_geographic(&self) -> bool {
        is_geographic_proj4(&self.proj4_definition)
    }

    /// Projected coordinates of a cell center
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.x0 + col as f64 * self.dx,
            self.y0 + row as f64 * self.dy,
        )
    }

    /// True when a fractional cell position lies within the grid coverage
    pub fn contains_cell(&self, row: f64, col: f64) -> bool {
        row >= -0.5 && row < self.rows as f64 - 0.5 && col >= -0.5 && col < self.cols as f64 - 0.5
    }
}

pub(crate) fn is_geographic_proj4(proj4: &str) -> bool {
    proj4.split_whitespace().any(|token| {
        matches!(
            token,
            "+proj=latlong" | "+proj=longlat" | "+proj=lonlat" | "+proj=latlon"
        )
    })
}

/// Missing or non-finite measurement
pub(crate) fn is_invalid_value(value: f32, fill_value: f32) -> bool {
    !value.is_finite() || (!fill_value.is_nan() && value == fill_value)
}

/// Output cell still holding the fill value
pub(crate) fn is_fill_output(value: f32, fill_value: f32) -> bool {
    if fill_value.is_nan() {
        value.is_nan()
    } else {
        value == fill_value
    }
}

/// Error types for remapping
#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown grid: {0}")]
    UnknownGrid(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Empty result: product '{0}' has no valid cells on the grid")]
    EmptyResult(String),

    #[error("Invalid geometry parameter: {0}")]
    InvalidGeometryParameter(String),

    #[error("Invalid grid definition: {0}")]
    InvalidGrid(String),

    #[error("Invalid swath: {0}")]
    InvalidSwath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for remapping operations
pub type RemapResult<T> = Result<T, RemapError>;
