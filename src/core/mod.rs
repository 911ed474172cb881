//! Core remapping modules

pub mod grid_registry;
pub mod projector;
pub mod resample;
pub mod nearest;
pub mod ewa;
pub mod gridded_scene;
pub mod remap;

// Re-export main types
pub use grid_registry::GridRegistry;
pub use projector::{Projector, ProjectedSwath, project_lonlat};
pub use resample::{Resampler, ResampleMethod};
pub use nearest::{NearestResampler, NearestParams, SampleIndex};
pub use ewa::{EwaResampler, EwaParams, EwaGeometry, WeightCurve};
pub use gridded_scene::{GriddedScene, GriddedProduct, GriddedSceneBuilder};
pub use remap::{Remapper, RemapOutput, RemapReport, GridReport, GridStatus, ProductStatus, remap_scene};
