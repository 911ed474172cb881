use crate::types::{
    is_fill_output, GridDefinition, ProductData, RemapError, RemapResult, SwathProduct,
};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::BTreeMap;

/// One product resampled onto a grid
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedProduct {
    pub product_name: String,
    pub description: String,
    pub units: String,
    pub satellite: String,
    pub instrument: String,
    pub data_kind: String,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Swath the product was navigated by
    pub source_swath: String,
    pub data: ProductData,
}

impl GriddedProduct {
    /// Copy a swath product's metadata around gridded data
    pub fn from_swath(product: &SwathProduct, data: ProductData) -> Self {
        Self {
            product_name: product.product_name.clone(),
            description: product.description.clone(),
            units: product.units.clone(),
            satellite: product.satellite.clone(),
            instrument: product.instrument.clone(),
            data_kind: product.data_kind.clone(),
            begin_time: product.begin_time,
            end_time: product.end_time,
            source_swath: product.swath_name.clone(),
            data,
        }
    }
}

/// All products of one swath scene on one grid
///
/// Every array has the grid's shape; cells without data hold `fill_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedScene {
    grid: GridDefinition,
    fill_value: f32,
    begin_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    products: BTreeMap<String, GriddedProduct>,
}

impl GriddedScene {
    pub fn grid(&self) -> &GridDefinition {
        &self.grid
    }

    pub fn fill_value(&self) -> f32 {
        self.fill_value
    }

    pub fn begin_time(&self) -> DateTime<Utc> {
        self.begin_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn product(&self, product_name: &str) -> Option<&GriddedProduct> {
        self.products.get(product_name)
    }

    pub fn products(&self) -> impl Iterator<Item = &GriddedProduct> {
        self.products.values()
    }

    pub fn product_names(&self) -> Vec<String> {
        self.products.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Fraction of non-fill cells of a product, in percent
    pub fn coverage_percent(&self, product_name: &str) -> Option<f64> {
        let product = self.products.get(product_name)?;
        let valid = product
            .data
            .iter()
            .filter(|&&v| !is_fill_output(v, self.fill_value))
            .count();
        Some(valid as f64 / product.data.len() as f64 * 100.0)
    }
}

/// Collects resampled products for one grid
#[derive(Debug)]
pub struct GriddedSceneBuilder {
    scene: GriddedScene,
}

impl GriddedSceneBuilder {
    pub fn new(
        grid: GridDefinition,
        fill_value: f32,
        begin_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            scene: GriddedScene {
                grid,
                fill_value,
                begin_time,
                end_time,
                products: BTreeMap::new(),
            },
        }
    }

    /// Add a resampled array
    ///
    /// Fails with `InvalidFormat` on a shape mismatch and with `EmptyResult`
    /// when every cell is fill; the array is not added in either case.
    pub fn add_product(&mut self, product: &SwathProduct, data: ProductData) -> RemapResult<()> {
        let expected = self.scene.grid.shape();
        if data.dim() != expected {
            return Err(RemapError::InvalidFormat(format!(
                "product '{}' has shape {:?}, grid '{}' requires {:?}",
                product.product_name,
                data.dim(),
                self.scene.grid.grid_name,
                expected
            )));
        }

        let fill_value = self.scene.fill_value;
        if data.iter().all(|&v| is_fill_output(v, fill_value)) {
            return Err(RemapError::EmptyResult(product.product_name.clone()));
        }

        self.insert(GriddedProduct::from_swath(product, data));
        Ok(())
    }

    /// Add an all-fill array for a product that produced nothing
    pub fn add_fill_product(&mut self, product: &SwathProduct) {
        let data = Array2::from_elem(self.scene.grid.shape(), self.scene.fill_value);
        self.insert(GriddedProduct::from_swath(product, data));
    }

    fn insert(&mut self, product: GriddedProduct) {
        self.scene.products.insert(product.product_name.clone(), product);
    }

    pub fn product_count(&self) -> usize {
        self.scene.products.len()
    }

    pub fn build(self) -> GriddedScene {
        self.scene
    }
}

/// Reassemble a scene from stored parts, checking every array's shape
pub(crate) fn assemble_scene(
    grid: GridDefinition,
    fill_value: f32,
    begin_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    products: Vec<GriddedProduct>,
) -> RemapResult<GriddedScene> {
    let expected = grid.shape();
    let mut scene = GriddedScene {
        grid,
        fill_value,
        begin_time,
        end_time,
        products: BTreeMap::new(),
    };
    for product in products {
        if product.data.dim() != expected {
            return Err(RemapError::InvalidFormat(format!(
                "stored product '{}' has shape {:?}, expected {:?}",
                product.product_name,
                product.data.dim(),
                expected
            )));
        }
        scene.products.insert(product.product_name.clone(), product);
    }
    Ok(scene)
}
