use serde::{Deserialize, Serialize};

/// Tunable registration parameters.
///
/// All search radii and rejection thresholds are expressed as multiples of
/// the derived voxel size, so one density knob rescales the whole pipeline
/// consistently. The defaults mirror the reference tool's slider defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationParams {
    /// Density knob for the derived voxel size: the target bounding
    /// diagonal is divided by `55.0 * point_density`. Larger values keep
    /// more points.
    pub point_density: f64,

    /// Residual distance below which a point counts as aligned, used by
    /// display layers for tolerance-based coloring. Carried through the
    /// pipeline but not consumed by it.
    pub error_tolerance: f64,

    /// Normal estimation radius as a multiple of the voxel size.
    pub normal_radius_factor: f64,

    /// Neighbor cap for normal estimation.
    pub normal_max_neighbors: usize,

    /// Feature computation radius as a multiple of the voxel size.
    pub feature_radius_factor: f64,

    /// Neighbor cap for feature computation.
    pub feature_max_neighbors: usize,

    /// Keep only correspondences that are mutual nearest descriptors.
    pub mutual_filter: bool,

    /// RANSAC inlier distance threshold as a multiple of the voxel size.
    pub ransac_distance_factor: f64,

    /// RANSAC trial budget.
    pub max_ransac_iterations: usize,

    /// RANSAC confidence for the early-exit criterion, in (0, 1).
    pub ransac_confidence: f64,

    /// ICP correspondence rejection distance as a multiple of the voxel
    /// size.
    pub icp_distance_factor: f64,

    /// ICP iteration cap.
    pub icp_max_iterations: usize,

    /// ICP termination tolerance on the change in inlier RMSE between
    /// consecutive iterations.
    pub icp_tolerance: f64,
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            point_density: 0.8,
            error_tolerance: 0.15,
            normal_radius_factor: 2.0,
            normal_max_neighbors: 30,
            feature_radius_factor: 5.0,
            feature_max_neighbors: 100,
            mutual_filter: true,
            ransac_distance_factor: 1.5,
            max_ransac_iterations: 4_000_000,
            ransac_confidence: 0.999,
            icp_distance_factor: 0.4,
            icp_max_iterations: 30,
            icp_tolerance: 1e-6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = RegistrationParams::default();
        assert_eq!(params.point_density, 0.8);
        assert_eq!(params.max_ransac_iterations, 4_000_000);
        assert_eq!(params.icp_max_iterations, 30);
        assert!(params.mutual_filter);
    }

    #[test]
    fn test_serde_round_trip() {
        let params = RegistrationParams {
            point_density: 1.2,
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: RegistrationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
