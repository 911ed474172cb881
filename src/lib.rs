//! swath2grid: swath-to-grid remapping for polar-orbiting satellite imagery
//!
//! Navigated swath products (scan lines by samples, with per-sample
//! longitude/latitude) are resampled onto fixed map-projected grids with
//! either nearest-neighbour lookup or elliptical weighted averaging (EWA).
//! One call remaps a swath scene onto several grids, isolating failures per
//! grid and per product.

pub mod types;
pub mod config;
pub mod core;
pub mod io;

// Re-export main types and functions for easier access
pub use types::{
    GridDefinition, ProductData, RemapError, RemapResult, ScanGeometry, SwathDefinition, SwathProduct,
    SwathScene,
};

pub use crate::config::{Algorithm, RemapConfig, RemapOptions};
pub use crate::core::{
    remap_scene, EwaParams, GridRegistry, GriddedScene, NearestParams, RemapOutput, RemapReport, Remapper,
    ResampleMethod,
};
pub use io::SceneFile;

#[cfg(feature = "python")]
mod python {
    use super::*;
    use chrono::{DateTime, Utc};
    use numpy::{IntoPyArray, PyReadonlyArray2};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    fn runtime_error(e: RemapError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
    }

    fn parse_time(value: &str) -> PyResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("Invalid timestamp '{}': {}", value, e))
            })
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PySwathScene>()?;
        m.add_function(wrap_pyfunction!(grid_names, m)?)?;
        m.add_function(wrap_pyfunction!(remap, m)?)?;
        Ok(())
    }

    /// Python wrapper for SwathScene
    #[pyclass(name = "SwathScene")]
    struct PySwathScene {
        inner: SwathScene,
    }

    #[pymethods]
    impl PySwathScene {
        #[new]
        #[pyo3(signature = (ifov_along_scan=1.0, ifov_along_track=1.0))]
        fn new(ifov_along_scan: f64, ifov_along_track: f64) -> Self {
            PySwathScene {
                inner: SwathScene::new(ScanGeometry {
                    ifov_along_scan,
                    ifov_along_track,
                }),
            }
        }

        #[pyo3(signature = (swath_name, longitude, latitude, fill_value=f64::NAN, rows_per_scan=1))]
        fn add_swath(
            &mut self,
            swath_name: String,
            longitude: PyReadonlyArray2<f64>,
            latitude: PyReadonlyArray2<f64>,
            fill_value: f64,
            rows_per_scan: usize,
        ) -> PyResult<()> {
            let definition = SwathDefinition::new(
                swath_name,
                longitude.as_array().to_owned(),
                latitude.as_array().to_owned(),
                fill_value,
                rows_per_scan,
            )
            .map_err(runtime_error)?;
            self.inner.add_swath_definition(definition).map_err(runtime_error)
        }

        #[pyo3(signature = (product_name, swath_name, data, begin_time, end_time, fill_value=f32::NAN, units=String::new()))]
        #[allow(clippy::too_many_arguments)]
        fn add_product(
            &mut self,
            product_name: String,
            swath_name: String,
            data: PyReadonlyArray2<f32>,
            begin_time: &str,
            end_time: &str,
            fill_value: f32,
            units: String,
        ) -> PyResult<()> {
            let mut product = SwathProduct::new(
                product_name,
                swath_name,
                data.as_array().to_owned(),
                fill_value,
                parse_time(begin_time)?,
                parse_time(end_time)?,
            );
            product.units = units;
            self.inner.add_product(product).map_err(runtime_error)
        }

        fn product_names(&self) -> Vec<String> {
            self.inner.product_names()
        }

        fn __repr__(&self) -> String {
            format!("SwathScene(products={:?})", self.inner.product_names())
        }
    }

    /// Names of the built-in grids
    #[pyfunction]
    fn grid_names() -> Vec<String> {
        GridRegistry::builtin()
            .grid_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Remap a scene with JSON options
    ///
    /// Returns `(scenes, report)`: `scenes` maps grid id to a dict of product
    /// arrays, `report` maps grid id to its one-line status.
    #[pyfunction]
    fn remap<'py>(py: Python<'py>, scene: &PySwathScene, options: &str) -> PyResult<(&'py PyDict, &'py PyDict)> {
        let config = RemapOptions::from_json_str(options)
            .and_then(RemapOptions::into_config)
            .map_err(runtime_error)?;
        let output = py
            .allow_threads(|| remap_scene(&scene.inner, config))
            .map_err(runtime_error)?;

        let scenes = PyDict::new(py);
        for (grid_id, gridded) in output.scenes {
            let products = PyDict::new(py);
            for product in gridded.products() {
                products.set_item(&product.product_name, product.data.clone().into_pyarray(py))?;
            }
            scenes.set_item(grid_id, products)?;
        }

        let report = PyDict::new(py);
        for (grid, line) in output.report.grids.iter().zip(output.report.summary().lines()) {
            report.set_item(&grid.grid_id, line)?;
        }

        Ok((scenes, report))
    }
}
