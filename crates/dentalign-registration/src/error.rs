use dentalign_3d::error::CloudError;
use thiserror::Error;

/// Error types for registration operations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// An underlying point cloud operation failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The bounding diagonal of a cloud is zero, so no voxel size or
    /// scaling factor can be derived from it.
    #[error("Zero bounding diagonal for {cloud} cloud")]
    ZeroDiagonal {
        /// Which cloud had the degenerate bounding box.
        cloud: &'static str,
    },
}
