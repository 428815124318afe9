use rayon::prelude::*;

use crate::error::CloudError;
use crate::linalg::{cross3, dot3, normalize3};
use crate::search::SpatialIndex;

/// Dimensionality of an FPFH descriptor: 11 bins for each of the three
/// Darboux-frame angles.
pub const FPFH_DIM: usize = 33;

const BINS_PER_ANGLE: usize = 11;

/// FPFH descriptors for a point cloud, one fixed-length histogram per point,
/// index-aligned with the points they describe.
#[derive(Debug, Clone)]
pub struct FpfhFeatures {
    histograms: Vec<[f64; FPFH_DIM]>,
}

impl FpfhFeatures {
    /// Number of descriptors.
    #[inline]
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Check if there are no descriptors.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Get as reference the descriptor histograms.
    pub fn histograms(&self) -> &[[f64; FPFH_DIM]] {
        &self.histograms
    }
}

/// Compute FPFH descriptors for every point.
///
/// Two passes over the hybrid radius / k-NN neighborhoods: a simplified
/// point feature histogram (SPFH) per point, then the distance-weighted
/// accumulation of neighbor SPFHs. Descriptors depend only on relative
/// point and normal geometry, so they are invariant to rigid motion of the
/// whole cloud.
///
/// # Errors
///
/// Returns [`CloudError::MismatchedLengths`] if `normals` is not
/// index-aligned with `points`, [`CloudError::EmptyPointCloud`] for an
/// empty input, and [`CloudError::InvalidSearchRadius`] for a non-positive
/// radius.
pub fn compute_fpfh(
    points: &[[f64; 3]],
    normals: &[[f64; 3]],
    index: &SpatialIndex,
    radius: f64,
    max_nn: usize,
) -> Result<FpfhFeatures, CloudError> {
    if points.is_empty() {
        return Err(CloudError::EmptyPointCloud {
            stage: "compute_fpfh",
        });
    }
    if normals.len() != points.len() {
        return Err(CloudError::MismatchedLengths {
            left_name: "points",
            left_len: points.len(),
            right_name: "normals",
            right_len: normals.len(),
        });
    }
    if !(radius > 0.0) {
        return Err(CloudError::InvalidSearchRadius(radius));
    }

    // neighborhoods are reused by both passes; the query point itself is
    // dropped from its own neighborhood
    let neighborhoods: Vec<Vec<crate::search::Neighbor>> = points
        .par_iter()
        .enumerate()
        .map(|(i, point)| {
            index
                .hybrid(point, radius, max_nn)
                .into_iter()
                .filter(|n| n.index != i)
                .collect()
        })
        .collect();

    let spfh: Vec<[f64; FPFH_DIM]> = points
        .par_iter()
        .enumerate()
        .map(|(i, point)| compute_spfh(point, &normals[i], &neighborhoods[i], points, normals))
        .collect();

    let histograms = (0..points.len())
        .into_par_iter()
        .map(|i| {
            let mut fpfh = spfh[i];
            let neighbors = &neighborhoods[i];
            if !neighbors.is_empty() {
                let inv_k = 1.0 / neighbors.len() as f64;
                for n in neighbors {
                    if n.distance < 1e-12 {
                        continue;
                    }
                    let weight = inv_k / n.distance;
                    for (dst, src) in fpfh.iter_mut().zip(spfh[n.index].iter()) {
                        *dst += weight * src;
                    }
                }
            }
            normalize_histogram(&mut fpfh);
            fpfh
        })
        .collect();

    Ok(FpfhFeatures { histograms })
}

/// Simplified point feature histogram of one point against its neighbors.
fn compute_spfh(
    point: &[f64; 3],
    normal: &[f64; 3],
    neighbors: &[crate::search::Neighbor],
    points: &[[f64; 3]],
    normals: &[[f64; 3]],
) -> [f64; FPFH_DIM] {
    let mut histogram = [0.0; FPFH_DIM];

    for n in neighbors {
        let neighbor = &points[n.index];
        let neighbor_normal = &normals[n.index];

        let diff = [
            neighbor[0] - point[0],
            neighbor[1] - point[1],
            neighbor[2] - point[2],
        ];
        let dist = dot3(&diff, &diff).sqrt();
        if dist < 1e-12 {
            continue;
        }
        let direction = [diff[0] / dist, diff[1] / dist, diff[2] / dist];

        // Darboux frame anchored at the query point's normal
        let u = *normal;
        let v = normalize3(&cross3(&direction, &u));
        let w = cross3(&u, &v);

        let alpha = dot3(&v, neighbor_normal);
        let phi = dot3(&u, &direction);
        let theta = dot3(&w, neighbor_normal).atan2(dot3(&u, neighbor_normal));

        histogram[angle_bin(alpha)] += 1.0;
        histogram[BINS_PER_ANGLE + angle_bin(phi)] += 1.0;
        histogram[2 * BINS_PER_ANGLE + theta_bin(theta)] += 1.0;
    }

    histogram
}

/// Bin a cosine-valued angle feature in [-1, 1] into one of 11 bins.
#[inline]
fn angle_bin(value: f64) -> usize {
    (((value + 1.0) * 0.5 * BINS_PER_ANGLE as f64) as usize).min(BINS_PER_ANGLE - 1)
}

/// Bin an angle in [-pi, pi] into one of 11 bins.
#[inline]
fn theta_bin(theta: f64) -> usize {
    ((((theta + std::f64::consts::PI) / (2.0 * std::f64::consts::PI)) * BINS_PER_ANGLE as f64)
        as usize)
        .min(BINS_PER_ANGLE - 1)
}

fn normalize_histogram(histogram: &mut [f64; FPFH_DIM]) {
    let sum: f64 = histogram.iter().sum();
    if sum > 0.0 {
        for h in histogram.iter_mut() {
            *h /= sum;
        }
    }
}
