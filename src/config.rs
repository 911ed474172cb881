//! Remapping configuration
//!
//! `RemapOptions` is the flat option surface read from JSON files or built by
//! callers; it is validated into the immutable `RemapConfig` consumed by the
//! driver.

use crate::core::ewa::EwaParams;
use crate::core::nearest::NearestParams;
use crate::core::resample::ResampleMethod;
use crate::types::{RemapError, RemapResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resampling algorithm name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Nearest,
    Ewa,
}

impl std::str::FromStr for Algorithm {
    type Err = RemapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(Algorithm::Nearest),
            "ewa" => Ok(Algorithm::Ewa),
            _ => Err(RemapError::Config(format!("unknown remap algorithm '{}'", s))),
        }
    }
}

/// Flat remapping options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemapOptions {
    pub grid_ids: Vec<String>,
    pub algorithm: Algorithm,
    /// Nearest-neighbour search radius in grid cells
    pub distance_upper_bound: f64,
    /// EWA footprint diameter relative to the IFOV
    #[serde(rename = "fornav_D")]
    pub fornav_diameter: f64,
    #[serde(rename = "fornav_d")]
    pub fornav_scale: f64,
    /// Largest EWA footprint half-extent in grid cells
    pub max_extent: f64,
    pub weight_min: f64,
    /// Output fill value; `None` means NaN
    pub fill_value: Option<f32>,
    /// Subset of products to remap; `None` remaps every product
    pub products: Option<Vec<String>>,
    pub fail_on_empty_grid: bool,
    /// Extra grid configuration files
    pub grid_configs: Vec<PathBuf>,
}

impl Default for RemapOptions {
    fn default() -> Self {
        let nearest = NearestParams::default();
        let ewa = EwaParams::default();
        Self {
            grid_ids: Vec::new(),
            algorithm: Algorithm::Ewa,
            distance_upper_bound: nearest.distance_upper_bound,
            fornav_diameter: ewa.footprint_diameter,
            fornav_scale: ewa.footprint_scale,
            max_extent: ewa.max_extent,
            weight_min: ewa.weight_min,
            fill_value: None,
            products: None,
            fail_on_empty_grid: false,
            grid_configs: Vec::new(),
        }
    }
}

impl RemapOptions {
    pub fn from_json_str(text: &str) -> RemapResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> RemapResult<Self> {
        log::info!("Loading remap options: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Resampling method selected by `algorithm`
    pub fn method(&self) -> ResampleMethod {
        match self.algorithm {
            Algorithm::Nearest => ResampleMethod::Nearest(NearestParams {
                distance_upper_bound: self.distance_upper_bound,
            }),
            Algorithm::Ewa => ResampleMethod::Ewa(EwaParams {
                footprint_diameter: self.fornav_diameter,
                footprint_scale: self.fornav_scale,
                max_extent: self.max_extent,
                weight_min: self.weight_min,
            }),
        }
    }

    /// Validate the structure of the options
    ///
    /// Numeric algorithm parameters are checked per grid by the driver.
    pub fn into_config(self) -> RemapResult<RemapConfig> {
        let method = self.method();
        let mut grid_ids: Vec<String> = Vec::with_capacity(self.grid_ids.len());
        for grid_id in self.grid_ids {
            let grid_id = grid_id.trim().to_string();
            if grid_id.is_empty() {
                return Err(RemapError::Config("empty grid id".to_string()));
            }
            if grid_ids.contains(&grid_id) {
                log::warn!("Grid '{}' requested more than once", grid_id);
                continue;
            }
            grid_ids.push(grid_id);
        }
        if grid_ids.is_empty() {
            return Err(RemapError::Config("at least one grid id is required".to_string()));
        }

        Ok(RemapConfig {
            grid_ids,
            method,
            fill_value: self.fill_value.unwrap_or(f32::NAN),
            products: self.products,
            fail_on_empty_grid: self.fail_on_empty_grid,
            grid_configs: self.grid_configs,
        })
    }
}

/// Immutable configuration consumed by the remap driver
#[derive(Debug, Clone, PartialEq)]
pub struct RemapConfig {
    pub grid_ids: Vec<String>,
    pub method: ResampleMethod,
    pub fill_value: f32,
    pub products: Option<Vec<String>>,
    pub fail_on_empty_grid: bool,
    pub grid_configs: Vec<PathBuf>,
}

impl RemapConfig {
    /// Remap every product to `grid_ids` with `method`, NaN fill
    pub fn new<S: Into<String>>(grid_ids: impl IntoIterator<Item = S>, method: ResampleMethod) -> Self {
        Self {
            grid_ids: grid_ids.into_iter().map(Into::into).collect(),
            method,
            fill_value: f32::NAN,
            products: None,
            fail_on_empty_grid: false,
            grid_configs: Vec::new(),
        }
    }

    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn with_products<S: Into<String>>(mut self, products: impl IntoIterator<Item = S>) -> Self {
        self.products = Some(products.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_fail_on_empty_grid(mut self, fail_on_empty_grid: bool) -> Self {
        self.fail_on_empty_grid = fail_on_empty_grid;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nearest_options() {
        let options = RemapOptions::from_json_str(
            r#"{"grid_ids": ["wgs84_global_0p25", "lcc_conus_1km"], "algorithm": "nearest",
                "distance_upper_bound": 12, "fill_value": -999.0}"#,
        )
        .unwrap();
        let config = options.into_config().unwrap();
        assert_eq!(config.grid_ids.len(), 2);
        assert_eq!(config.fill_value, -999.0);
        assert_eq!(
            config.method,
            ResampleMethod::Nearest(NearestParams { distance_upper_bound: 12.0 })
        );
    }

    #[test]
    fn test_parse_ewa_options() {
        let options =
            RemapOptions::from_json_str(r#"{"grid_ids": ["g"], "fornav_D": 1.5, "fornav_d": 2, "max_extent": 12}"#).unwrap();
        let config = options.into_config().unwrap();
        assert!(config.fill_value.is_nan());
        match config.method {
            ResampleMethod::Ewa(params) => {
                assert_eq!(params.footprint_diameter, 1.5);
                assert_eq!(params.footprint_scale, 2.0);
                assert_eq!(params.max_extent, 12.0);
                assert_eq!(params.weight_min, 0.01);
            }
            other => panic!("expected EWA, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_bad_options() {
        assert!(RemapOptions::from_json_str(r#"{"grid_ids": ["g"], "algorithm": "bilinear"}"#).is_err());
        assert!(RemapOptions::from_json_str(r#"{"grid_ids": ["g"], "fornav_x": 1}"#).is_err());
        assert!(RemapOptions::default().into_config().is_err());
    }

    #[test]
    fn test_duplicate_grids_collapse() {
        let options = RemapOptions {
            grid_ids: vec!["a".into(), "b".into(), "a".into()],
            ..RemapOptions::default()
        };
        assert_eq!(options.into_config().unwrap().grid_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("EWA".parse::<Algorithm>().unwrap(), Algorithm::Ewa);
        assert!("cubic".parse::<Algorithm>().is_err());
    }
}
