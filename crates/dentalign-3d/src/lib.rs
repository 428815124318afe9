#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for point cloud operations.
pub mod error;

/// FPFH feature descriptors.
pub mod features;

/// Linear algebra utilities.
pub mod linalg;

/// Surface normal estimation.
pub mod normals;

/// Point cloud value type.
pub mod pointcloud;

/// K-d tree based neighbor search.
pub mod search;

/// Rigid transform type.
pub mod transform;

/// Voxel grid downsampling.
pub mod voxel;
