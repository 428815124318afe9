use faer::prelude::SpSolver;
use rayon::prelude::*;

use dentalign_3d::error::CloudError;
use dentalign_3d::linalg::{axis_angle_to_rotation_matrix, cross3, dot3};
use dentalign_3d::pointcloud::PointCloud;
use dentalign_3d::search::SpatialIndex;
use dentalign_3d::transform::RigidTransform;

use crate::error::RegistrationError;

/// Termination criteria for the ICP loop.
#[derive(Debug, Clone)]
pub struct IcpConvergenceCriteria {
    /// Iteration cap.
    pub max_iterations: usize,
    /// Stop once the change in inlier RMSE between consecutive iterations
    /// drops below this.
    pub tolerance: f64,
}

impl Default for IcpConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            tolerance: 1e-6,
        }
    }
}

/// Outcome of ICP refinement.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Refined source-to-target transform.
    pub transform: RigidTransform,
    /// Retained correspondences over source points, in [0, 1].
    pub fitness: f64,
    /// Root mean square distance over retained correspondences.
    pub inlier_rmse: f64,
    /// Iterations executed.
    pub num_iterations: usize,
    /// Whether the tolerance criterion was met before the iteration cap.
    /// `false` with zero fitness marks the no-correspondence outcome.
    pub converged: bool,
}

/// Refine a source-to-target transform with point-to-plane ICP.
///
/// Each iteration moves the source by the running transform, pairs every
/// moved point with its nearest target point, drops pairs farther than
/// `max_distance` apart and solves the linearized least-squares problem for
/// the small rigid increment that minimizes the summed squared distances to
/// the target tangent planes. The increment is composed into the running
/// transform, so the returned rotation stays orthonormal.
///
/// If no correspondence survives thresholding in the first iteration the
/// seed transform is returned unchanged with zero fitness and
/// `converged = false`; this is a low-confidence result, not an error.
///
/// # Errors
///
/// Returns [`CloudError::MissingNormals`] if the target carries no normals
/// and [`CloudError::EmptyPointCloud`] if either cloud is empty.
pub fn icp_point_to_plane(
    source: &[[f64; 3]],
    target: &PointCloud,
    init: &RigidTransform,
    max_distance: f64,
    criteria: &IcpConvergenceCriteria,
) -> Result<IcpResult, RegistrationError> {
    if source.is_empty() {
        return Err(CloudError::EmptyPointCloud {
            stage: "icp_point_to_plane",
        }
        .into());
    }
    if target.is_empty() {
        return Err(CloudError::EmptyPointCloud {
            stage: "icp_point_to_plane",
        }
        .into());
    }
    let target_normals = target.normals().ok_or(CloudError::MissingNormals {
        stage: "icp_point_to_plane",
    })?;
    let target_points = target.points();
    let index = SpatialIndex::build(target_points);

    let mut current = init.clone();
    let mut prev_rmse = f64::INFINITY;
    let mut fitness = 0.0;
    let mut inlier_rmse = 0.0;
    let mut num_iterations = 0;
    let mut converged = false;

    for iteration in 0..criteria.max_iterations {
        let moved = current.apply_points(source);

        // (source index, target index) pairs within the rejection distance
        let correspondences: Vec<(usize, usize)> = moved
            .par_iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let nn = index.nearest_one(p)?;
                (nn.distance <= max_distance).then_some((i, nn.index))
            })
            .collect();

        if correspondences.is_empty() {
            log::warn!(
                "icp_point_to_plane: no correspondences within {} at iteration {}",
                max_distance,
                iteration
            );
            if iteration == 0 {
                return Ok(IcpResult {
                    transform: init.clone(),
                    fitness: 0.0,
                    inlier_rmse: 0.0,
                    num_iterations: 0,
                    converged: false,
                });
            }
            break;
        }

        let mut sq_sum = 0.0;
        for &(i, j) in &correspondences {
            let p = &moved[i];
            let q = &target_points[j];
            let d = [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
            sq_sum += dot3(&d, &d);
        }
        inlier_rmse = (sq_sum / correspondences.len() as f64).sqrt();
        fitness = correspondences.len() as f64 / source.len() as f64;
        num_iterations = iteration + 1;

        log::debug!(
            "icp_point_to_plane: iteration {}, rmse {:.6}, fitness {:.4}",
            iteration,
            inlier_rmse,
            fitness
        );

        if (prev_rmse - inlier_rmse).abs() < criteria.tolerance {
            converged = true;
            break;
        }
        prev_rmse = inlier_rmse;

        let Some(delta) = solve_increment(&moved, target_points, target_normals, &correspondences)
        else {
            log::warn!("icp_point_to_plane: singular system at iteration {}", iteration);
            break;
        };
        current = delta.compose(&current);
    }

    Ok(IcpResult {
        transform: current,
        fitness,
        inlier_rmse,
        num_iterations,
        converged,
    })
}

/// Solve the linearized point-to-plane system for the small rigid
/// increment. Row i of the Jacobian is `[p x n, n]` with residual
/// `n . (p - q)`; the 6x6 normal equations are solved by LU.
///
/// Returns `None` when the solve produces a non-finite increment, which
/// happens for degenerate correspondence geometry.
fn solve_increment(
    moved: &[[f64; 3]],
    target_points: &[[f64; 3]],
    target_normals: &[[f64; 3]],
    correspondences: &[(usize, usize)],
) -> Option<RigidTransform> {
    let mut ata = [[0.0; 6]; 6];
    let mut atb = [0.0; 6];

    // serial accumulation keeps the summation order, and therefore the
    // result, deterministic
    for &(i, j) in correspondences {
        let p = &moved[i];
        let q = &target_points[j];
        let n = &target_normals[j];

        let pxn = cross3(p, n);
        let row = [pxn[0], pxn[1], pxn[2], n[0], n[1], n[2]];
        let d = [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
        let residual = dot3(n, &d);

        for a in 0..6 {
            for b in 0..6 {
                ata[a][b] += row[a] * row[b];
            }
            atb[a] -= row[a] * residual;
        }
    }

    let mut a_mat = faer::Mat::<f64>::zeros(6, 6);
    let mut b_mat = faer::Mat::<f64>::zeros(6, 1);
    for i in 0..6 {
        for j in 0..6 {
            a_mat.write(i, j, ata[i][j]);
        }
        b_mat.write(i, 0, atb[i]);
    }

    let x = a_mat.partial_piv_lu().solve(&b_mat);
    let mut solution = [0.0; 6];
    for (i, s) in solution.iter_mut().enumerate() {
        *s = x.read(i, 0);
        if !s.is_finite() {
            return None;
        }
    }

    let omega = [solution[0], solution[1], solution[2]];
    let angle = dot3(&omega, &omega).sqrt();
    let rotation = axis_angle_to_rotation_matrix(&omega, angle);
    Some(RigidTransform::new(
        rotation,
        [solution[3], solution[4], solution[5]],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use dentalign_3d::linalg::euclidean_distance;
    use dentalign_3d::normals::estimate_normals;

    fn wavy_cloud() -> Vec<[f64; 3]> {
        (0..400)
            .map(|i| {
                let x = (i % 20) as f64 * 0.1;
                let y = (i / 20) as f64 * 0.1;
                [x, y, (x * 2.0).sin() * 0.3 + (y * 1.5).cos() * 0.2]
            })
            .collect()
    }

    fn with_normals(points: Vec<[f64; 3]>) -> PointCloud {
        let index = SpatialIndex::build(&points);
        let normals = estimate_normals(&points, &index, 0.4, 30).unwrap();
        let mut cloud = PointCloud::from_points(points);
        cloud.set_normals(normals).unwrap();
        cloud
    }

    #[test]
    fn test_icp_recovers_small_motion() {
        let source = wavy_cloud();
        let true_transform = RigidTransform::new(
            axis_angle_to_rotation_matrix(&[0.0, 0.0, 1.0], 0.04),
            [0.05, -0.03, 0.02],
        );
        let target = with_normals(true_transform.apply_points(&source));

        let result = icp_point_to_plane(
            &source,
            &target,
            &RigidTransform::identity(),
            0.5,
            &IcpConvergenceCriteria::default(),
        )
        .unwrap();

        assert!(result.converged);
        assert!(result.transform.is_rigid(1e-4));
        assert!(result.fitness > 0.99);

        // the recovered transform maps source points onto their targets
        let aligned = result.transform.apply_points(&source);
        let max_error = aligned
            .iter()
            .zip(target.points().iter())
            .map(|(a, b)| euclidean_distance(a, b))
            .fold(0.0, f64::max);
        assert!(max_error < 1e-3, "max error {}", max_error);
    }

    #[test]
    fn test_icp_does_not_worsen_alignment() {
        let source = wavy_cloud();
        let true_transform = RigidTransform::new(
            axis_angle_to_rotation_matrix(&[0.1, 0.2, 1.0], 0.05),
            [0.04, 0.02, -0.05],
        );
        let target = with_normals(true_transform.apply_points(&source));

        // rmse of the identity seed
        let target_index = SpatialIndex::build(target.points());
        let seed_sq_sum: f64 = source
            .iter()
            .filter_map(|p| target_index.nearest_one(p))
            .map(|nn| nn.distance * nn.distance)
            .sum();
        let seed_rmse = (seed_sq_sum / source.len() as f64).sqrt();

        let result = icp_point_to_plane(
            &source,
            &target,
            &RigidTransform::identity(),
            0.5,
            &IcpConvergenceCriteria::default(),
        )
        .unwrap();

        assert!(result.inlier_rmse <= seed_rmse);
    }

    #[test]
    fn test_icp_zero_correspondences_returns_seed() {
        let source = vec![[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]];
        let target = with_normals(vec![
            [100.0, 100.0, 100.0],
            [100.1, 100.0, 100.0],
            [100.0, 100.1, 100.0],
        ]);
        let seed = RigidTransform::new(
            axis_angle_to_rotation_matrix(&[0.0, 1.0, 0.0], 0.3),
            [1.0, 2.0, 3.0],
        );

        let result = icp_point_to_plane(
            &source,
            &target,
            &seed,
            0.01,
            &IcpConvergenceCriteria::default(),
        )
        .unwrap();

        assert!(!result.converged);
        assert_eq!(result.fitness, 0.0);
        assert_eq!(result.num_iterations, 0);
        for i in 0..3 {
            assert_relative_eq!(result.transform.translation[i], seed.translation[i]);
            for j in 0..3 {
                assert_relative_eq!(result.transform.rotation[i][j], seed.rotation[i][j]);
            }
        }
    }

    #[test]
    fn test_icp_requires_target_normals() {
        let source = vec![[0.0, 0.0, 0.0]];
        let target = PointCloud::from_points(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        let result = icp_point_to_plane(
            &source,
            &target,
            &RigidTransform::identity(),
            1.0,
            &IcpConvergenceCriteria::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_icp_rejects_empty_source() {
        let target = with_normals(wavy_cloud());
        let result = icp_point_to_plane(
            &[],
            &target,
            &RigidTransform::identity(),
            1.0,
            &IcpConvergenceCriteria::default(),
        );
        assert!(result.is_err());
    }
}
