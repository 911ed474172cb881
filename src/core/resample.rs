//! Shared interface of the swath resamplers

use crate::core::ewa::EwaParams;
use crate::core::nearest::NearestParams;
use crate::core::projector::ProjectedSwath;
use crate::types::{GridDefinition, ProductData, RemapResult, ScanGeometry, SwathDefinition, SwathProduct};
use serde::{Deserialize, Serialize};

/// A swath-to-grid resampling algorithm
///
/// Resampling is split in two: `prepare` does the work that only depends on
/// navigation (spatial index, footprints) once per swath definition and grid,
/// `resample` then runs per product against that prepared geometry.
pub trait Resampler {
    /// Navigation-dependent state reused by every product of one swath
    type Geometry;

    fn method_name(&self) -> &'static str;

    /// Check the algorithm parameters before any work is done
    fn validate(&self, scan_geometry: &ScanGeometry) -> RemapResult<()>;

    fn prepare(
        &self,
        swath: &SwathDefinition,
        projected: &ProjectedSwath,
        grid: &GridDefinition,
        scan_geometry: &ScanGeometry,
    ) -> RemapResult<Self::Geometry>;

    /// Resample one product; cells without contribution hold `fill_value`
    fn resample(
        &self,
        geometry: &Self::Geometry,
        product: &SwathProduct,
        grid: &GridDefinition,
        fill_value: f32,
    ) -> RemapResult<ProductData>;
}

/// Algorithm selection with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "lowercase")]
pub enum ResampleMethod {
    Nearest(NearestParams),
    Ewa(EwaParams),
}

impl Default for ResampleMethod {
    fn default() -> Self {
        ResampleMethod::Ewa(EwaParams::default())
    }
}

impl ResampleMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ResampleMethod::Nearest(_) => "nearest",
            ResampleMethod::Ewa(_) => "ewa",
        }
    }
}

impl std::fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResampleMethod::Nearest(p) => write!(f, "nearest(distance_upper_bound={})", p.distance_upper_bound),
            ResampleMethod::Ewa(p) => write!(
                f,
                "ewa(fornav_D={}, fornav_d={}, max_extent={})",
                p.footprint_diameter, p.footprint_scale, p.max_extent
            ),
        }
    }
}
