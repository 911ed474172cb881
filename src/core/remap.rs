//! Remap driver
//!
//! Runs every requested (grid, product) pair and isolates failures: a bad
//! grid only loses that grid, a bad product only loses that product on that
//! grid. The outcome of every unit is recorded in a [`RemapReport`].

use crate::config::RemapConfig;
use crate::core::ewa::EwaResampler;
use crate::core::grid_registry::GridRegistry;
use crate::core::gridded_scene::{GriddedScene, GriddedSceneBuilder};
use crate::core::nearest::NearestResampler;
use crate::core::projector::Projector;
use crate::core::resample::{ResampleMethod, Resampler};
use crate::types::{GridDefinition, RemapResult, SwathProduct, SwathScene};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one grid
#[derive(Debug, Clone, PartialEq)]
pub enum GridStatus {
    Completed,
    Failed(String),
}

/// Outcome of one product on one grid
#[derive(Debug, Clone, PartialEq)]
pub enum ProductStatus {
    Succeeded,
    Failed(String),
    Skipped(String),
}

impl ProductStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ProductStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridReport {
    pub grid_id: String,
    pub status: GridStatus,
    /// Product name -> status
    pub products: BTreeMap<String, ProductStatus>,
}

impl GridReport {
    pub fn is_completed(&self) -> bool {
        self.status == GridStatus::Completed
    }

    pub fn succeeded_products(&self) -> Vec<&str> {
        self.products
            .iter()
            .filter(|(_, status)| status.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Per-grid and per-product outcomes of one remap call, in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemapReport {
    pub grids: Vec<GridReport>,
}

impl RemapReport {
    pub fn grid(&self, grid_id: &str) -> Option<&GridReport> {
        self.grids.iter().find(|g| g.grid_id == grid_id)
    }

    pub fn completed_grids(&self) -> usize {
        self.grids.iter().filter(|g| g.is_completed()).count()
    }

    pub fn failed_grids(&self) -> usize {
        self.grids.len() - self.completed_grids()
    }

    /// True when every grid completed and every product succeeded
    pub fn is_complete_success(&self) -> bool {
        self.grids
            .iter()
            .all(|g| g.is_completed() && g.products.values().all(ProductStatus::is_success))
    }

    /// One line per grid, suitable for logging
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.grids.len());
        for grid in &self.grids {
            let line = match &grid.status {
                GridStatus::Completed => format!(
                    "{}: completed, {}/{} products",
                    grid.grid_id,
                    grid.succeeded_products().len(),
                    grid.products.len()
                ),
                GridStatus::Failed(reason) => format!("{}: failed ({})", grid.grid_id, reason),
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Gridded scenes keyed by grid id plus the report
#[derive(Debug, Clone)]
pub struct RemapOutput {
    pub scenes: BTreeMap<String, GriddedScene>,
    pub report: RemapReport,
}

impl RemapOutput {
    pub fn scene(&self, grid_id: &str) -> Option<&GriddedScene> {
        self.scenes.get(grid_id)
    }
}

/// Products requested for this call, split by availability
struct ProductSelection<'a> {
    /// Present in the scene, grouped by swath definition
    by_swath: BTreeMap<&'a str, Vec<&'a SwathProduct>>,
    missing: Vec<String>,
}

impl<'a> ProductSelection<'a> {
    fn new(scene: &'a SwathScene, requested: Option<&[String]>) -> Self {
        let mut by_swath: BTreeMap<&str, Vec<&SwathProduct>> = BTreeMap::new();
        let mut missing = Vec::new();

        match requested {
            Some(names) => {
                let mut seen = BTreeSet::new();
                for name in names {
                    if !seen.insert(name.as_str()) {
                        log::warn!("Product '{}' requested more than once; remapping it once", name);
                        continue;
                    }
                    match scene.product(name) {
                        Some(product) => by_swath.entry(product.swath_name.as_str()).or_default().push(product),
                        None => {
                            log::warn!("Requested product '{}' is not in the swath scene", name);
                            missing.push(name.clone());
                        }
                    }
                }
            }
            None => {
                for product in scene.products() {
                    by_swath.entry(product.swath_name.as_str()).or_default().push(product);
                }
            }
        }

        Self { by_swath, missing }
    }

    fn product_names(&self) -> impl Iterator<Item = &str> {
        self.by_swath
            .values()
            .flatten()
            .map(|p| p.product_name.as_str())
            .chain(self.missing.iter().map(String::as_str))
    }

    fn skipped_statuses(&self, reason: &str) -> BTreeMap<String, ProductStatus> {
        self.product_names()
            .map(|name| (name.to_string(), ProductStatus::Skipped(reason.to_string())))
            .collect()
    }
}

/// Resampling of a swath scene onto registered grids
#[derive(Debug, Clone)]
pub struct Remapper {
    registry: GridRegistry,
    config: RemapConfig,
}

impl Remapper {
    pub fn new(registry: GridRegistry, config: RemapConfig) -> Self {
        Self { registry, config }
    }

    /// Built-in grids plus the grid files named by the configuration
    pub fn from_config(config: RemapConfig) -> RemapResult<Self> {
        let registry = GridRegistry::with_config_files(&config.grid_configs)?;
        Ok(Self::new(registry, config))
    }

    pub fn registry(&self) -> &GridRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RemapConfig {
        &self.config
    }

    /// Remap the scene onto every configured grid
    ///
    /// Never fails as a whole; failures are recorded in the report and the
    /// affected grids are absent from `scenes`.
    pub fn remap(&self, scene: &SwathScene) -> RemapOutput {
        let selection = ProductSelection::new(scene, self.config.products.as_deref());
        log::info!(
            "Remapping {} products onto {} grids with {}",
            selection.by_swath.values().map(Vec::len).sum::<usize>(),
            self.config.grid_ids.len(),
            self.config.method
        );

        #[cfg(feature = "parallel")]
        let outcomes: Vec<(Option<GriddedScene>, GridReport)> = self
            .config
            .grid_ids
            .par_iter()
            .map(|grid_id| self.remap_selection(scene, grid_id, &selection))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<(Option<GriddedScene>, GridReport)> = self
            .config
            .grid_ids
            .iter()
            .map(|grid_id| self.remap_selection(scene, grid_id, &selection))
            .collect();

        let mut scenes = BTreeMap::new();
        let mut report = RemapReport::default();
        for (gridded, grid_report) in outcomes {
            if let Some(gridded) = gridded {
                scenes.insert(grid_report.grid_id.clone(), gridded);
            }
            report.grids.push(grid_report);
        }

        log::info!(
            "Remapping finished: {} of {} grids completed",
            report.completed_grids(),
            report.grids.len()
        );
        for line in report.summary().lines() {
            log::debug!("  {}", line);
        }

        RemapOutput { scenes, report }
    }

    /// Remap the scene onto a single grid
    pub fn remap_grid(&self, scene: &SwathScene, grid_id: &str) -> (Option<GriddedScene>, GridReport) {
        let selection = ProductSelection::new(scene, self.config.products.as_deref());
        self.remap_selection(scene, grid_id, &selection)
    }

    fn remap_selection(
        &self,
        scene: &SwathScene,
        grid_id: &str,
        selection: &ProductSelection<'_>,
    ) -> (Option<GriddedScene>, GridReport) {
        let failed = |reason: String| -> (Option<GriddedScene>, GridReport) {
            log::warn!("Grid '{}' failed: {}", grid_id, reason);
            let report = GridReport {
                grid_id: grid_id.to_string(),
                products: selection.skipped_statuses(&format!("grid '{}' failed", grid_id)),
                status: GridStatus::Failed(reason),
            };
            (None, report)
        };

        let grid = match self.registry.resolve(grid_id) {
            Ok(grid) => grid,
            Err(e) => return failed(e.to_string()),
        };

        let result = match &self.config.method {
            ResampleMethod::Nearest(params) => {
                self.remap_with(&NearestResampler::new(params.clone()), scene, grid, selection)
            }
            ResampleMethod::Ewa(params) => {
                self.remap_with(&EwaResampler::new(params.clone()), scene, grid, selection)
            }
        };

        let (gridded, mut products) = match result {
            Ok(done) => done,
            Err(e) => return failed(e.to_string()),
        };
        for name in &selection.missing {
            products.insert(
                name.clone(),
                ProductStatus::Skipped("not present in the swath scene".to_string()),
            );
        }

        let attempted = products.values().filter(|s| !matches!(s, ProductStatus::Skipped(_))).count();
        let succeeded = products.values().filter(|s| s.is_success()).count();
        if attempted > 0 && succeeded == 0 && self.config.fail_on_empty_grid {
            log::warn!("Grid '{}' failed: no product produced valid cells", grid_id);
            let report = GridReport {
                grid_id: grid_id.to_string(),
                status: GridStatus::Failed("no product produced valid cells".to_string()),
                products,
            };
            return (None, report);
        }

        log::info!(
            "Grid '{}' completed: {}/{} products",
            grid_id,
            succeeded,
            attempted
        );
        let report = GridReport {
            grid_id: grid_id.to_string(),
            status: GridStatus::Completed,
            products,
        };
        (Some(gridded), report)
    }

    /// Grid-level errors abort the grid; product errors are recorded
    fn remap_with<R: Resampler>(
        &self,
        resampler: &R,
        scene: &SwathScene,
        grid: &GridDefinition,
        selection: &ProductSelection<'_>,
    ) -> RemapResult<(GriddedScene, BTreeMap<String, ProductStatus>)> {
        resampler.validate(&scene.scan_geometry)?;
        let projector = Projector::new(grid)?;

        let fill_value = self.config.fill_value;
        // Empty scenes carry the Unix epoch
        let mut builder = GriddedSceneBuilder::new(
            grid.clone(),
            fill_value,
            scene.begin_time().unwrap_or_default(),
            scene.end_time().unwrap_or_default(),
        );
        let mut statuses = BTreeMap::new();

        for (swath_name, products) in &selection.by_swath {
            let Some(swath) = scene.swath_definition(swath_name) else {
                for product in products {
                    statuses.insert(
                        product.product_name.clone(),
                        ProductStatus::Failed(format!("swath '{}' is not defined", swath_name)),
                    );
                }
                continue;
            };

            let projected = projector.project_swath(swath);
            let geometry = match resampler.prepare(swath, &projected, grid, &scene.scan_geometry) {
                Ok(geometry) => geometry,
                Err(e) => {
                    log::warn!(
                        "Swath '{}' could not be prepared for grid '{}': {}",
                        swath_name,
                        grid.grid_name,
                        e
                    );
                    for product in products {
                        statuses.insert(product.product_name.clone(), ProductStatus::Failed(e.to_string()));
                    }
                    continue;
                }
            };

            for product in products {
                let status = match resampler
                    .resample(&geometry, product, grid, fill_value)
                    .and_then(|data| builder.add_product(product, data))
                {
                    Ok(()) => {
                        log::debug!(
                            "Resampled '{}' onto grid '{}' ({})",
                            product.product_name,
                            grid.grid_name,
                            resampler.method_name()
                        );
                        ProductStatus::Succeeded
                    }
                    Err(e) => {
                        log::warn!(
                            "Product '{}' on grid '{}' failed: {}",
                            product.product_name,
                            grid.grid_name,
                            e
                        );
                        ProductStatus::Failed(e.to_string())
                    }
                };
                statuses.insert(product.product_name.clone(), status);
            }
        }

        let any_success = statuses.values().any(ProductStatus::is_success);
        if !any_success && !self.config.fail_on_empty_grid {
            for products in selection.by_swath.values() {
                for product in products {
                    builder.add_fill_product(product);
                }
            }
        }

        Ok((builder.build(), statuses))
    }
}

/// Remap `scene` with `config`, using the built-in grids plus any
/// configured grid files
pub fn remap_scene(scene: &SwathScene, config: RemapConfig) -> RemapResult<RemapOutput> {
    let remapper = Remapper::from_config(config)?;
    Ok(remapper.remap(scene))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ewa::EwaParams;
    use crate::core::nearest::NearestParams;
    use crate::types::{ScanGeometry, SwathDefinition};
    use chrono::{DateTime, Utc};
    use ndarray::{array, Array2};

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000, 0).unwrap()
    }

    fn registry() -> GridRegistry {
        let mut registry = GridRegistry::new();
        registry.register(
            GridDefinition::new("cells", "+proj=latlong +ellps=WGS84", 0.0, 0.0, 1.0, 1.0, 4, 4).unwrap(),
        );
        registry.register(
            GridDefinition::new("far", "+proj=latlong +ellps=WGS84", 100.0, 50.0, 1.0, 1.0, 4, 4).unwrap(),
        );
        registry
    }

    fn scene() -> SwathScene {
        let mut scene = SwathScene::new(ScanGeometry::default());
        scene
            .add_swath_definition(
                SwathDefinition::new("nav", array![[1.0, 2.0], [1.0, 2.0]], array![[1.0, 1.0], [2.0, 2.0]], f64::NAN, 1)
                    .unwrap(),
            )
            .unwrap();
        scene
            .add_product(SwathProduct::new("bt", "nav", array![[1.0, 2.0], [3.0, 4.0]], -999.0, epoch(), epoch()))
            .unwrap();
        scene
            .add_product(SwathProduct::new("empty", "nav", Array2::from_elem((2, 2), -999.0), -999.0, epoch(), epoch()))
            .unwrap();
        scene
    }

    fn nearest() -> ResampleMethod {
        ResampleMethod::Nearest(NearestParams { distance_upper_bound: 0.5 })
    }

    #[test]
    fn test_product_failure_is_isolated() {
        let remapper = Remapper::new(registry(), RemapConfig::new(["cells"], nearest()));
        let output = remapper.remap(&scene());

        let report = output.report.grid("cells").unwrap();
        assert!(report.is_completed());
        assert_eq!(report.products["bt"], ProductStatus::Succeeded);
        assert!(matches!(report.products["empty"], ProductStatus::Failed(_)));

        let gridded = output.scene("cells").unwrap();
        assert_eq!(gridded.product_names(), vec!["bt"]);
        assert_eq!(gridded.product("bt").unwrap().data[[2, 2]], 4.0);
    }

    #[test]
    fn test_repeated_product_request_remaps_once() {
        let scene = scene();
        let requested = vec!["bt".to_string(), "bt".to_string(), "gone".to_string(), "gone".to_string()];
        let selection = ProductSelection::new(&scene, Some(requested.as_slice()));
        assert_eq!(selection.by_swath["nav"].len(), 1);
        assert_eq!(selection.missing, vec!["gone"]);
        assert_eq!(selection.product_names().collect::<Vec<_>>(), vec!["bt", "gone"]);

        let config = RemapConfig::new(["cells"], nearest()).with_products(requested);
        let output = Remapper::new(registry(), config).remap(&scene);
        let report = output.report.grid("cells").unwrap();
        assert_eq!(report.products.len(), 2);
        assert_eq!(report.products["bt"], ProductStatus::Succeeded);
        assert_eq!(output.scene("cells").unwrap().product_names(), vec!["bt"]);
    }

    #[test]
    fn test_all_failed_grid_yields_fill_scene() {
        let remapper = Remapper::new(registry(), RemapConfig::new(["far"], nearest()).with_fill_value(-1.0));
        let output = remapper.remap(&scene());

        let report = output.report.grid("far").unwrap();
        assert!(report.is_completed());
        assert!(report.succeeded_products().is_empty());
        let gridded = output.scene("far").unwrap();
        assert_eq!(gridded.len(), 2);
        assert!(gridded.product("bt").unwrap().data.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_fail_on_empty_grid() {
        let config = RemapConfig::new(["far"], nearest()).with_fail_on_empty_grid(true);
        let output = Remapper::new(registry(), config).remap(&scene());
        assert!(output.scene("far").is_none());
        assert!(matches!(output.report.grid("far").unwrap().status, GridStatus::Failed(_)));
    }

    #[test]
    fn test_invalid_parameters_fail_grid_only() {
        let method = ResampleMethod::Ewa(EwaParams {
            footprint_scale: 0.0,
            ..EwaParams::default()
        });
        let output = Remapper::new(registry(), RemapConfig::new(["cells", "far"], method)).remap(&scene());
        assert_eq!(output.report.failed_grids(), 2);
        assert!(output.scenes.is_empty());
        for status in output.report.grids[0].products.values() {
            assert!(matches!(status, ProductStatus::Skipped(_)));
        }
    }

    #[test]
    fn test_missing_requested_product_is_skipped() {
        let config = RemapConfig::new(["cells"], nearest()).with_products(["bt", "ghost"]);
        let output = Remapper::new(registry(), config).remap(&scene());
        let report = output.report.grid("cells").unwrap();
        assert_eq!(report.products.len(), 2);
        assert!(matches!(report.products["ghost"], ProductStatus::Skipped(_)));
        assert!(!output.report.is_complete_success());
    }

    #[test]
    fn test_report_summary() {
        let output = Remapper::new(registry(), RemapConfig::new(["cells", "nowhere"], nearest())).remap(&scene());
        let summary = output.report.summary();
        assert!(summary.contains("cells: completed, 1/2 products"));
        assert!(summary.contains("nowhere: failed"));
    }
}
