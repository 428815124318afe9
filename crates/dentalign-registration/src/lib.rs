#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod error;
pub use error::RegistrationError;

/// Tunable registration parameters.
pub mod params;
pub use params::RegistrationParams;

/// RANSAC global registration over FPFH correspondences.
pub mod global;
pub use global::{global_registration, GlobalRegistrationResult};

/// Point-to-plane ICP refinement.
pub mod icp;
pub use icp::{icp_point_to_plane, IcpConvergenceCriteria, IcpResult};

/// Pipeline orchestration: preprocessing, coarse and fine alignment.
pub mod pipeline;
pub use pipeline::{
    apply_transform, estimate_transform, preprocess, register, Preprocessed, RegistrationOutput,
};
