use rayon::prelude::*;

use crate::error::CloudError;
use crate::search::SpatialIndex;

/// Estimate one unit normal per point from a covariance plane fit over the
/// hybrid radius / k-NN neighborhood of each point.
///
/// Normal orientation is NOT made globally consistent: there is no
/// propagation or flipping pass, so neighboring normals may point to
/// opposite sides of the surface. Downstream feature computation tolerates
/// this; callers that need consistently oriented normals must orient them
/// separately.
///
/// Points with fewer than 3 neighbors get the +z unit normal.
///
/// # Errors
///
/// Returns [`CloudError::EmptyPointCloud`] for an empty input and
/// [`CloudError::InvalidSearchRadius`] for a non-positive radius.
pub fn estimate_normals(
    points: &[[f64; 3]],
    index: &SpatialIndex,
    radius: f64,
    max_nn: usize,
) -> Result<Vec<[f64; 3]>, CloudError> {
    if points.is_empty() {
        return Err(CloudError::EmptyPointCloud {
            stage: "estimate_normals",
        });
    }
    if !(radius > 0.0) {
        return Err(CloudError::InvalidSearchRadius(radius));
    }

    let normals = points
        .par_iter()
        .map(|point| {
            let neighbors = index.hybrid(point, radius, max_nn);
            if neighbors.len() < 3 {
                return [0.0, 0.0, 1.0];
            }

            // centroid of the neighborhood
            let mut centroid = [0.0; 3];
            for n in &neighbors {
                let q = &points[n.index];
                centroid[0] += q[0];
                centroid[1] += q[1];
                centroid[2] += q[2];
            }
            let inv_count = 1.0 / neighbors.len() as f64;
            centroid[0] *= inv_count;
            centroid[1] *= inv_count;
            centroid[2] *= inv_count;

            // covariance matrix of the neighborhood
            let mut cov = [[0.0; 3]; 3];
            for n in &neighbors {
                let q = &points[n.index];
                let d = [q[0] - centroid[0], q[1] - centroid[1], q[2] - centroid[2]];
                for i in 0..3 {
                    for j in 0..3 {
                        cov[i][j] += d[i] * d[j];
                    }
                }
            }

            smallest_eigenvector(&cov)
        })
        .collect();

    Ok(normals)
}

/// Eigenvector of the smallest eigenvalue of a symmetric 3x3 matrix, unit
/// length, via SVD (singular vectors are eigenvectors for symmetric PSD
/// input and faer orders singular values descending).
fn smallest_eigenvector(m: &[[f64; 3]; 3]) -> [f64; 3] {
    let mat = faer::mat![
        [m[0][0], m[0][1], m[0][2]],
        [m[1][0], m[1][1], m[1][2]],
        [m[2][0], m[2][1], m[2][2]],
    ];
    let svd = mat.svd();
    let u = svd.u();
    [u.read(0, 2), u.read(1, 2), u.read(2, 2)]
}
