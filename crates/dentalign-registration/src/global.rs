use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use dentalign_3d::error::CloudError;
use dentalign_3d::features::{FpfhFeatures, FPFH_DIM};
use dentalign_3d::linalg::euclidean_distance;
use dentalign_3d::transform::RigidTransform;

use crate::error::RegistrationError;
use crate::params::RegistrationParams;

/// Edge-length similarity band: corresponding edges of a sampled triple
/// must agree within this ratio in both directions.
const EDGE_SIMILARITY: f64 = 0.9;

/// Trials evaluated per parallel batch between early-exit checks.
const TRIAL_BATCH: usize = 256;

/// Outcome of RANSAC global registration.
#[derive(Debug, Clone)]
pub struct GlobalRegistrationResult {
    /// Estimated source-to-target transform.
    pub transform: RigidTransform,
    /// Inlier correspondences over total correspondences, in [0, 1].
    pub fitness: f64,
    /// Root mean square distance over inlier correspondences.
    pub inlier_rmse: f64,
    /// Number of RANSAC trials executed.
    pub num_trials: usize,
    /// Whether any candidate transform passed validation. `false` marks
    /// the degenerate identity outcome.
    pub converged: bool,
}

impl GlobalRegistrationResult {
    fn degenerate() -> Self {
        Self {
            transform: RigidTransform::identity(),
            fitness: 0.0,
            inlier_rmse: 0.0,
            num_trials: 0,
            converged: false,
        }
    }
}

// Best-so-far RANSAC candidate; ordering is (inliers desc, rmse asc,
// trial asc) so the parallel reduction is a total order and the winner is
// independent of thread scheduling.
#[derive(Debug, Clone)]
struct Candidate {
    transform: RigidTransform,
    inlier_count: usize,
    rmse: f64,
    trial: usize,
}

fn better(a: &Candidate, b: &Candidate) -> bool {
    if a.inlier_count != b.inlier_count {
        return a.inlier_count > b.inlier_count;
    }
    if a.rmse != b.rmse {
        return a.rmse < b.rmse;
    }
    a.trial < b.trial
}

/// Estimate a coarse source-to-target transform by RANSAC over feature
/// correspondences.
///
/// Correspondences are seeded by nearest-descriptor lookup from source
/// features into a k-d tree over the target features, optionally pruned to
/// mutual nearest pairs. Each trial samples three distinct correspondences,
/// rejects them on edge-length similarity, solves the rigid transform in
/// closed form and rejects it if any sampled pair lands farther than
/// `max_distance` apart. Surviving candidates are scored by inlier count
/// over the full correspondence set.
///
/// Fewer than three correspondences, or no candidate passing validation,
/// yields the identity transform with zero fitness and `converged = false`
/// rather than an error.
///
/// # Errors
///
/// Returns [`CloudError::MismatchedLengths`] if either feature set is not
/// index-aligned with its points.
pub fn global_registration(
    source: &[[f64; 3]],
    target: &[[f64; 3]],
    source_features: &FpfhFeatures,
    target_features: &FpfhFeatures,
    max_distance: f64,
    params: &RegistrationParams,
    seed: u64,
) -> Result<GlobalRegistrationResult, RegistrationError> {
    if source_features.len() != source.len() {
        return Err(CloudError::MismatchedLengths {
            left_name: "source points",
            left_len: source.len(),
            right_name: "source features",
            right_len: source_features.len(),
        }
        .into());
    }
    if target_features.len() != target.len() {
        return Err(CloudError::MismatchedLengths {
            left_name: "target points",
            left_len: target.len(),
            right_name: "target features",
            right_len: target_features.len(),
        }
        .into());
    }

    let correspondences = match_features(source_features, target_features, params.mutual_filter);
    let num_corr = correspondences.len();
    if num_corr < 3 {
        log::warn!(
            "global_registration: only {} correspondences, returning identity",
            num_corr
        );
        return Ok(GlobalRegistrationResult::degenerate());
    }
    log::debug!(
        "global_registration: {} correspondences (mutual_filter = {})",
        num_corr,
        params.mutual_filter
    );

    let mut best: Option<Candidate> = None;
    let mut trials_run = 0;

    while trials_run < params.max_ransac_iterations {
        let batch_end = (trials_run + TRIAL_BATCH).min(params.max_ransac_iterations);

        let batch_best = (trials_run..batch_end)
            .into_par_iter()
            .filter_map(|trial| {
                evaluate_trial(
                    trial,
                    seed,
                    source,
                    target,
                    &correspondences,
                    max_distance,
                )
            })
            .reduce_with(|a, b| if better(&a, &b) { a } else { b });

        trials_run = batch_end;

        if let Some(candidate) = batch_best {
            if best.as_ref().map_or(true, |b| better(&candidate, b)) {
                best = Some(candidate);
            }
        }

        if let Some(best) = &best {
            let inlier_ratio = best.inlier_count as f64 / num_corr as f64;
            if inlier_ratio >= 1.0 {
                break;
            }
            // expected trials to hit an all-inlier sample at the requested
            // confidence
            let required = (1.0 - params.ransac_confidence).ln()
                / (1.0 - inlier_ratio.powi(3)).ln();
            if trials_run as f64 >= required {
                break;
            }
        }
    }

    let result = match best {
        Some(best) => GlobalRegistrationResult {
            transform: best.transform,
            fitness: best.inlier_count as f64 / num_corr as f64,
            inlier_rmse: best.rmse,
            num_trials: trials_run,
            converged: true,
        },
        None => {
            log::warn!(
                "global_registration: no candidate validated after {} trials",
                trials_run
            );
            GlobalRegistrationResult {
                num_trials: trials_run,
                ..GlobalRegistrationResult::degenerate()
            }
        }
    };

    log::debug!(
        "global_registration: fitness {:.4}, rmse {:.6}, {} trials",
        result.fitness,
        result.inlier_rmse,
        result.num_trials
    );
    Ok(result)
}

/// Seed correspondences by nearest descriptor in 33-D feature space.
fn match_features(
    source_features: &FpfhFeatures,
    target_features: &FpfhFeatures,
    mutual_filter: bool,
) -> Vec<(usize, usize)> {
    let target_tree: ImmutableKdTree<f64, u32, FPFH_DIM, 32> =
        ImmutableKdTree::new_from_slice(target_features.histograms());

    let forward: Vec<(usize, usize)> = source_features
        .histograms()
        .par_iter()
        .enumerate()
        .map(|(i, descriptor)| {
            let nn = target_tree.nearest_one::<SquaredEuclidean>(descriptor);
            (i, nn.item as usize)
        })
        .collect();

    if !mutual_filter {
        return forward;
    }

    let source_tree: ImmutableKdTree<f64, u32, FPFH_DIM, 32> =
        ImmutableKdTree::new_from_slice(source_features.histograms());

    forward
        .into_par_iter()
        .filter(|&(i, j)| {
            let back = source_tree
                .nearest_one::<SquaredEuclidean>(&target_features.histograms()[j]);
            back.item as usize == i
        })
        .collect()
}

/// Run one RANSAC trial. Returns the scored candidate, or `None` if the
/// sample fails a checker.
fn evaluate_trial(
    trial: usize,
    seed: u64,
    source: &[[f64; 3]],
    target: &[[f64; 3]],
    correspondences: &[(usize, usize)],
    max_distance: f64,
) -> Option<Candidate> {
    // per-trial rng keyed on the trial index keeps the sample sequence
    // independent of thread scheduling
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(trial as u64));
    let sample = sample_distinct(&mut rng, correspondences.len());

    let src_tri = sample.map(|k| source[correspondences[k].0]);
    let tgt_tri = sample.map(|k| target[correspondences[k].1]);

    if !edge_lengths_compatible(&src_tri, &tgt_tri) {
        return None;
    }

    let transform = kabsch(&src_tri, &tgt_tri);

    // sampled pairs must land within the inlier threshold under the
    // candidate transform
    for k in 0..3 {
        if euclidean_distance(&transform.apply_point(&src_tri[k]), &tgt_tri[k]) > max_distance {
            return None;
        }
    }

    let (inlier_count, rmse) = score(&transform, source, target, correspondences, max_distance);
    if inlier_count == 0 {
        return None;
    }

    Some(Candidate {
        transform,
        inlier_count,
        rmse,
        trial,
    })
}

/// Draw three distinct indices in `0..n`. Caller guarantees `n >= 3`.
fn sample_distinct(rng: &mut StdRng, n: usize) -> [usize; 3] {
    let a = rng.random_range(0..n);
    let b = loop {
        let b = rng.random_range(0..n);
        if b != a {
            break b;
        }
    };
    let c = loop {
        let c = rng.random_range(0..n);
        if c != a && c != b {
            break c;
        }
    };
    [a, b, c]
}

/// Check that corresponding edges of the sampled triples agree in length
/// within the similarity band, in both directions.
fn edge_lengths_compatible(src: &[[f64; 3]; 3], tgt: &[[f64; 3]; 3]) -> bool {
    for (i, j) in [(0, 1), (0, 2), (1, 2)] {
        let ds = euclidean_distance(&src[i], &src[j]);
        let dt = euclidean_distance(&tgt[i], &tgt[j]);
        if ds <= EDGE_SIMILARITY * dt || dt <= EDGE_SIMILARITY * ds {
            return false;
        }
    }
    true
}

/// Closed-form rigid transform aligning `src` onto `dst` in the least
/// squares sense, via SVD of the cross-covariance with reflection
/// correction.
fn kabsch(src: &[[f64; 3]], dst: &[[f64; 3]]) -> RigidTransform {
    let inv_n = 1.0 / src.len() as f64;

    let mut src_centroid = [0.0; 3];
    let mut dst_centroid = [0.0; 3];
    for (p, q) in src.iter().zip(dst.iter()) {
        for k in 0..3 {
            src_centroid[k] += p[k] * inv_n;
            dst_centroid[k] += q[k] * inv_n;
        }
    }

    // cross-covariance H = sum (p - cp) (q - cq)^T
    let mut h = [[0.0; 3]; 3];
    for (p, q) in src.iter().zip(dst.iter()) {
        let dp = [
            p[0] - src_centroid[0],
            p[1] - src_centroid[1],
            p[2] - src_centroid[2],
        ];
        let dq = [
            q[0] - dst_centroid[0],
            q[1] - dst_centroid[1],
            q[2] - dst_centroid[2],
        ];
        for i in 0..3 {
            for j in 0..3 {
                h[i][j] += dp[i] * dq[j];
            }
        }
    }

    let h_mat = faer::mat![
        [h[0][0], h[0][1], h[0][2]],
        [h[1][0], h[1][1], h[1][2]],
        [h[2][0], h[2][1], h[2][2]],
    ];
    let svd = h_mat.svd();
    let u = svd.u();
    let v = svd.v();

    // R = V U^T, flipping the last column of V if it encodes a reflection
    let mut rotation = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            rotation[i][j] =
                v.read(i, 0) * u.read(j, 0) + v.read(i, 1) * u.read(j, 1)
                    + v.read(i, 2) * u.read(j, 2);
        }
    }
    if dentalign_3d::linalg::det_mat33(&rotation) < 0.0 {
        for i in 0..3 {
            for j in 0..3 {
                rotation[i][j] = v.read(i, 0) * u.read(j, 0) + v.read(i, 1) * u.read(j, 1)
                    - v.read(i, 2) * u.read(j, 2);
            }
        }
    }

    let translation = [
        dst_centroid[0]
            - (rotation[0][0] * src_centroid[0]
                + rotation[0][1] * src_centroid[1]
                + rotation[0][2] * src_centroid[2]),
        dst_centroid[1]
            - (rotation[1][0] * src_centroid[0]
                + rotation[1][1] * src_centroid[1]
                + rotation[1][2] * src_centroid[2]),
        dst_centroid[2]
            - (rotation[2][0] * src_centroid[0]
                + rotation[2][1] * src_centroid[1]
                + rotation[2][2] * src_centroid[2]),
    ];

    RigidTransform::new(rotation, translation)
}

/// Count inliers and their RMSE over the full correspondence set.
fn score(
    transform: &RigidTransform,
    source: &[[f64; 3]],
    target: &[[f64; 3]],
    correspondences: &[(usize, usize)],
    max_distance: f64,
) -> (usize, f64) {
    let mut count = 0;
    let mut sq_sum = 0.0;
    for &(i, j) in correspondences {
        let d = euclidean_distance(&transform.apply_point(&source[i]), &target[j]);
        if d <= max_distance {
            count += 1;
            sq_sum += d * d;
        }
    }
    let rmse = if count > 0 {
        (sq_sum / count as f64).sqrt()
    } else {
        0.0
    };
    (count, rmse)
}
