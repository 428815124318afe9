use thiserror::Error;

/// Error types for point cloud operations.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The point cloud has no points.
    #[error("Empty point cloud in {stage}")]
    EmptyPointCloud {
        /// The operation that rejected the cloud.
        stage: &'static str,
    },

    /// Two index-aligned attribute sequences have different lengths.
    #[error("Mismatched lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedLengths {
        /// Label for the left-hand sequence.
        left_name: &'static str,
        /// Length of the left-hand sequence.
        left_len: usize,
        /// Label for the right-hand sequence.
        right_name: &'static str,
        /// Length of the right-hand sequence.
        right_len: usize,
    },

    /// Voxel size must be strictly positive.
    #[error("Invalid voxel size: {0}")]
    InvalidVoxelSize(f64),

    /// Search radius must be strictly positive.
    #[error("Invalid search radius: {0}")]
    InvalidSearchRadius(f64),

    /// The operation requires per-point normals but the cloud has none.
    #[error("Point cloud has no normals in {stage}")]
    MissingNormals {
        /// The operation that needed the normals.
        stage: &'static str,
    },
}
