use crate::error::CloudError;

/// A point cloud with points and optional index-aligned unit normals.
#[derive(Debug, Clone)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The normals of the points, one per point when present.
    normals: Option<Vec<[f64; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points and normals (optional).
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MismatchedLengths`] if normals are present and
    /// their count differs from the point count.
    pub fn new(points: Vec<[f64; 3]>, normals: Option<Vec<[f64; 3]>>) -> Result<Self, CloudError> {
        if let Some(normals) = &normals {
            if normals.len() != points.len() {
                return Err(CloudError::MismatchedLengths {
                    left_name: "points",
                    left_len: points.len(),
                    right_name: "normals",
                    right_len: normals.len(),
                });
            }
        }
        Ok(Self { points, normals })
    }

    /// Create a point cloud from points only.
    pub fn from_points(points: Vec<[f64; 3]>) -> Self {
        Self {
            points,
            normals: None,
        }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Attach per-point normals, replacing any existing ones.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::MismatchedLengths`] on a count mismatch.
    pub fn set_normals(&mut self, normals: Vec<[f64; 3]>) -> Result<(), CloudError> {
        if normals.len() != self.points.len() {
            return Err(CloudError::MismatchedLengths {
                left_name: "points",
                left_len: self.points.len(),
                right_name: "normals",
                right_len: normals.len(),
            });
        }
        self.normals = Some(normals);
        Ok(())
    }

    /// Get the minimum bound of the point cloud.
    pub fn min_bound(&self) -> [f64; 3] {
        self.points.iter().fold(
            [f64::INFINITY, f64::INFINITY, f64::INFINITY],
            |acc, p| [acc[0].min(p[0]), acc[1].min(p[1]), acc[2].min(p[2])],
        )
    }

    /// Get the maximum bound of the point cloud.
    pub fn max_bound(&self) -> [f64; 3] {
        self.points.iter().fold(
            [f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY],
            |acc, p| [acc[0].max(p[0]), acc[1].max(p[1]), acc[2].max(p[2])],
        )
    }

    /// Length of the diagonal of the axis-aligned bounding box.
    ///
    /// Returns 0.0 for an empty cloud.
    pub fn bounding_diagonal(&self) -> f64 {
        if self.points.is_empty() {
            return 0.0;
        }
        let min = self.min_bound();
        let max = self.max_bound();
        ((max[0] - min[0]).powi(2) + (max[1] - min[1]).powi(2) + (max[2] - min[2]).powi(2)).sqrt()
    }

    /// Scale all points by `factor` about the origin, in place.
    ///
    /// Normals are unaffected since a uniform scale preserves directions.
    pub fn scale(&mut self, factor: f64) {
        for p in &mut self.points {
            p[0] *= factor;
            p[1] *= factor;
            p[2] *= factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pointcloud() -> Result<(), CloudError> {
        let cloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        )?;

        assert_eq!(cloud.len(), 2);
        assert!(!cloud.is_empty());

        if let Some(normals) = cloud.normals() {
            assert_eq!(normals.len(), 2);
        }

        Ok(())
    }

    #[test]
    fn test_mismatched_normals() {
        let result = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[0.0, 1.0, 0.0]]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bounds_and_diagonal() {
        let cloud = PointCloud::from_points(vec![[0.0, 0.0, 0.0], [1.0, 2.0, 2.0]]);
        assert_eq!(cloud.min_bound(), [0.0, 0.0, 0.0]);
        assert_eq!(cloud.max_bound(), [1.0, 2.0, 2.0]);
        assert_relative_eq!(cloud.bounding_diagonal(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_diagonal() {
        let cloud = PointCloud::from_points(vec![]);
        assert_eq!(cloud.bounding_diagonal(), 0.0);
    }

    #[test]
    fn test_scale_about_origin() {
        let mut cloud = PointCloud::from_points(vec![[1.0, -2.0, 0.5]]);
        cloud.scale(2.0);
        assert_eq!(cloud.points()[0], [2.0, -4.0, 1.0]);
    }
}
