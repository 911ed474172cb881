//! Input/output for intermediate scene files

pub mod scene_file;

pub use scene_file::SceneFile;
