use rand::Rng;

use dentalign_3d::features::{compute_fpfh, FpfhFeatures};
use dentalign_3d::normals::estimate_normals;
use dentalign_3d::pointcloud::PointCloud;
use dentalign_3d::search::SpatialIndex;
use dentalign_3d::transform::RigidTransform;
use dentalign_3d::voxel::voxel_downsample;

use crate::error::RegistrationError;
use crate::global::{global_registration, GlobalRegistrationResult};
use crate::icp::{icp_point_to_plane, IcpConvergenceCriteria, IcpResult};
use crate::params::RegistrationParams;

/// Divisor relating the target bounding diagonal to the voxel size at unit
/// point density.
const DIAGONAL_TO_VOXEL: f64 = 55.0;

/// Downsampled clouds with features, ready for transform estimation.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Downsampled source cloud with normals, pre-scaled by `scaling`.
    pub source: PointCloud,
    /// Downsampled target cloud with normals.
    pub target: PointCloud,
    /// FPFH descriptors of the source cloud.
    pub source_features: FpfhFeatures,
    /// FPFH descriptors of the target cloud.
    pub target_features: FpfhFeatures,
    /// Derived voxel size; all downstream thresholds are multiples of it.
    pub voxel_size: f64,
    /// Uniform scale applied to the source about the origin before
    /// downsampling. 1.0 when scaling was skipped.
    pub scaling: f64,
}

/// Full result of a registration run.
#[derive(Debug, Clone)]
pub struct RegistrationOutput {
    /// Final source-to-target transform. Applies to the scaled source.
    pub transform: RigidTransform,
    /// Scale factor that was applied to the source before alignment.
    pub scaling: f64,
    /// Derived voxel size.
    pub voxel_size: f64,
    /// Coarse stage diagnostics.
    pub global: GlobalRegistrationResult,
    /// Refinement stage diagnostics.
    pub refinement: IcpResult,
    /// The scaled source points moved by the final transform, for display.
    pub aligned_source: Vec<[f64; 3]>,
}

/// Derive the voxel size and scaling factor, then downsample both clouds
/// and compute their normals and features.
///
/// The voxel size comes from the target bounding diagonal and the density
/// parameter; the scaling factor is the ratio of target to source diagonal
/// (or 1.0 when `skip_scaling`) and is applied about the origin to a
/// working copy of the source. The raw inputs are never modified.
///
/// # Errors
///
/// Fails on empty clouds and on zero bounding diagonals, with the stage
/// and cloud named in the error.
pub fn preprocess(
    raw_source: &PointCloud,
    raw_target: &PointCloud,
    skip_scaling: bool,
    params: &RegistrationParams,
) -> Result<Preprocessed, RegistrationError> {
    let target_diagonal = raw_target.bounding_diagonal();
    if target_diagonal <= 0.0 {
        return Err(RegistrationError::ZeroDiagonal { cloud: "target" });
    }
    let voxel_size = target_diagonal / (DIAGONAL_TO_VOXEL * params.point_density);

    let scaling = if skip_scaling {
        1.0
    } else {
        let source_diagonal = raw_source.bounding_diagonal();
        if source_diagonal <= 0.0 {
            return Err(RegistrationError::ZeroDiagonal { cloud: "source" });
        }
        target_diagonal / source_diagonal
    };

    log::info!(
        "preprocess: voxel size {:.6}, scaling {:.6}",
        voxel_size,
        scaling
    );

    let mut working_source = raw_source.clone();
    working_source.scale(scaling);

    let (source, source_features) = preprocess_cloud(&working_source, voxel_size, params)?;
    let (target, target_features) = preprocess_cloud(raw_target, voxel_size, params)?;

    Ok(Preprocessed {
        source,
        target,
        source_features,
        target_features,
        voxel_size,
        scaling,
    })
}

/// Downsample one cloud, estimate its normals and compute its features.
fn preprocess_cloud(
    cloud: &PointCloud,
    voxel_size: f64,
    params: &RegistrationParams,
) -> Result<(PointCloud, FpfhFeatures), RegistrationError> {
    let mut down = voxel_downsample(cloud, voxel_size)?;
    let index = SpatialIndex::build(down.points());

    let normals = estimate_normals(
        down.points(),
        &index,
        voxel_size * params.normal_radius_factor,
        params.normal_max_neighbors,
    )?;
    down.set_normals(normals)?;

    let features = compute_fpfh(
        down.points(),
        down.normals().unwrap_or(&[]),
        &index,
        voxel_size * params.feature_radius_factor,
        params.feature_max_neighbors,
    )?;

    Ok((down, features))
}

/// Estimate the source-to-target transform from preprocessed clouds:
/// RANSAC global registration followed by point-to-plane ICP refinement.
///
/// Refinement runs on the downsampled clouds rather than the raw input, a
/// deliberate speed/accuracy trade-off.
///
/// `seed` fixes the RANSAC sample sequence; `None` draws a fresh seed and
/// logs it so a run can be replayed.
///
/// # Errors
///
/// Fails only on structural problems (missing normals, empty clouds);
/// non-convergence is reported through the diagnostics instead.
pub fn estimate_transform(
    pre: &Preprocessed,
    params: &RegistrationParams,
    seed: Option<u64>,
) -> Result<(RigidTransform, GlobalRegistrationResult, IcpResult), RegistrationError> {
    let seed = seed.unwrap_or_else(|| {
        let drawn = rand::rng().random::<u64>();
        log::debug!("estimate_transform: drew RANSAC seed {}", drawn);
        drawn
    });

    let global = global_registration(
        pre.source.points(),
        pre.target.points(),
        &pre.source_features,
        &pre.target_features,
        pre.voxel_size * params.ransac_distance_factor,
        params,
        seed,
    )?;
    if !global.converged {
        log::warn!("estimate_transform: coarse alignment is low-confidence");
    }

    let criteria = IcpConvergenceCriteria {
        max_iterations: params.icp_max_iterations,
        tolerance: params.icp_tolerance,
    };
    let refinement = icp_point_to_plane(
        pre.source.points(),
        &pre.target,
        &global.transform,
        pre.voxel_size * params.icp_distance_factor,
        &criteria,
    )?;

    log::info!(
        "estimate_transform: global fitness {:.4}, refined fitness {:.4}, rmse {:.6}",
        global.fitness,
        refinement.fitness,
        refinement.inlier_rmse
    );

    Ok((refinement.transform.clone(), global, refinement))
}

/// Run the whole pipeline: preprocessing, coarse and fine alignment, and
/// the display-ready moved source points.
///
/// # Errors
///
/// Propagates preprocessing and estimation failures; see [`preprocess`]
/// and [`estimate_transform`].
pub fn register(
    raw_source: &PointCloud,
    raw_target: &PointCloud,
    skip_scaling: bool,
    params: &RegistrationParams,
    seed: Option<u64>,
) -> Result<RegistrationOutput, RegistrationError> {
    let pre = preprocess(raw_source, raw_target, skip_scaling, params)?;
    let (transform, global, refinement) = estimate_transform(&pre, params, seed)?;

    let mut working_source = raw_source.clone();
    working_source.scale(pre.scaling);
    let aligned_source = transform.apply_points(working_source.points());

    Ok(RegistrationOutput {
        transform,
        scaling: pre.scaling,
        voxel_size: pre.voxel_size,
        global,
        refinement,
        aligned_source,
    })
}

/// Apply a rigid transform to a point slice, returning the moved points.
pub fn apply_transform(transform: &RigidTransform, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
    transform.apply_points(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dentalign_3d::linalg::{axis_angle_to_rotation_matrix, euclidean_distance};

    /// Dense wavy sheet, asymmetric so coarse alignment has no spurious
    /// symmetric optimum.
    fn wavy_cloud() -> PointCloud {
        let points = (0..1600)
            .map(|i| {
                let x = (i % 40) as f64 * 0.05;
                let y = (i / 40) as f64 * 0.05;
                [x, y, (x * 2.0).sin() * 0.3 + (y * 1.5).cos() * 0.2 + x * y * 0.05]
            })
            .collect();
        PointCloud::from_points(points)
    }

    #[test]
    fn test_register_translated_source() {
        let target = wavy_cloud();

        // source = target translated by (1, 0, 0) plus ~1% noise
        let noise =
            |i: usize| ((i as f64 * 12.9898).sin() * 43758.5453).fract().abs() * 0.01 - 0.005;
        let source_points: Vec<[f64; 3]> = target
            .points()
            .iter()
            .enumerate()
            .map(|(i, p)| [p[0] + 1.0 + noise(3 * i), p[1] + noise(3 * i + 1), p[2] + noise(3 * i + 2)])
            .collect();
        let source = PointCloud::from_points(source_points);

        let params = RegistrationParams::default();
        let output = register(&source, &target, true, &params, Some(42)).unwrap();

        assert_eq!(output.scaling, 1.0);
        assert!(output.transform.is_rigid(1e-4));
        assert!(output.refinement.fitness > 0.5);

        // the recovered translation undoes the (1, 0, 0) shift
        let t = &output.transform.translation;
        assert!(
            euclidean_distance(t, &[-1.0, 0.0, 0.0]) < 0.05,
            "translation {:?}",
            t
        );
    }

    #[test]
    fn test_register_round_trip() {
        let target = wavy_cloud();
        let true_transform = RigidTransform::new(
            axis_angle_to_rotation_matrix(&[0.2, -0.1, 1.0], 0.35),
            [0.4, -0.3, 0.2],
        );
        let source = PointCloud::from_points(true_transform.apply_points(target.points()));

        let params = RegistrationParams::default();
        let output = register(&source, &target, true, &params, Some(7)).unwrap();

        // recovered transform composed with the original motion is near
        // identity
        let roundtrip = output.transform.compose(&true_transform);
        let identity = RigidTransform::identity();
        assert!(euclidean_distance(&roundtrip.translation, &identity.translation) < 0.05);
        for i in 0..3 {
            for j in 0..3 {
                assert!((roundtrip.rotation[i][j] - identity.rotation[i][j]).abs() < 0.05);
            }
        }
    }

    #[test]
    fn test_preprocess_scaling_factor() {
        let target = wavy_cloud();
        let mut source = target.clone();
        source.scale(2.0);

        let params = RegistrationParams::default();
        let pre = preprocess(&source, &target, false, &params).unwrap();
        assert_relative_eq!(pre.scaling, 0.5, epsilon = 1e-12);

        // scaled source and target now span the same bounding box
        assert_relative_eq!(
            pre.source.bounding_diagonal(),
            pre.target.bounding_diagonal(),
            epsilon = pre.voxel_size
        );
    }

    #[test]
    fn test_preprocess_voxel_size() {
        let target = wavy_cloud();
        let params = RegistrationParams::default();
        let pre = preprocess(&target, &target, true, &params).unwrap();
        let expected = target.bounding_diagonal() / (55.0 * params.point_density);
        assert_relative_eq!(pre.voxel_size, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_preprocess_rejects_zero_diagonal() {
        let degenerate = PointCloud::from_points(vec![[1.0, 1.0, 1.0]; 5]);
        let target = wavy_cloud();
        let params = RegistrationParams::default();

        assert!(preprocess(&target, &degenerate, true, &params).is_err());
        assert!(preprocess(&degenerate, &target, false, &params).is_err());
    }

    #[test]
    fn test_apply_transform_identity() {
        let points = vec![[1.0, 2.0, 3.0], [-0.5, 0.0, 4.0]];
        let moved = apply_transform(&RigidTransform::identity(), &points);
        assert_eq!(moved, points);
    }
}
