use crate::linalg;

/// A rigid transform: rotation followed by translation.
///
/// Maps points from the source to the target frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidTransform {
    /// Rotation matrix, row major.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl RigidTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    /// Create a transform from a rotation matrix and translation vector.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Apply the transform to a single point.
    #[inline]
    pub fn apply_point(&self, p: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Apply the transform to a slice of points, returning a new vector.
    pub fn apply_points(&self, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        let mut dst = vec![[0.0; 3]; points.len()];
        linalg::transform_points(points, &self.rotation, &self.translation, &mut dst);
        dst
    }

    /// Compose two transforms: `self.compose(&other)` maps a point through
    /// `other` first, then through `self`.
    pub fn compose(&self, other: &Self) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        linalg::matmul33(&self.rotation, &other.rotation, &mut rotation);
        let translation = self.apply_point(&other.translation);
        Self {
            rotation,
            translation,
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Self {
        let r = &self.rotation;
        // R' = R^T
        let rotation = [
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ];
        // t' = -R^T * t
        let t = &self.translation;
        let translation = [
            -(rotation[0][0] * t[0] + rotation[0][1] * t[1] + rotation[0][2] * t[2]),
            -(rotation[1][0] * t[0] + rotation[1][1] * t[1] + rotation[1][2] * t[2]),
            -(rotation[2][0] * t[0] + rotation[2][1] * t[1] + rotation[2][2] * t[2]),
        ];
        Self {
            rotation,
            translation,
        }
    }

    /// Export as a 4x4 homogeneous matrix, row major.
    pub fn to_matrix4(&self) -> [[f64; 4]; 4] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            [r[0][0], r[0][1], r[0][2], t[0]],
            [r[1][0], r[1][1], r[1][2], t[1]],
            [r[2][0], r[2][1], r[2][2], t[2]],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Check that the rotation block is orthonormal with determinant +1
    /// within `tol`.
    pub fn is_rigid(&self, tol: f64) -> bool {
        let r = &self.rotation;
        let rt = [
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ];
        let mut rrt = [[0.0; 3]; 3];
        linalg::matmul33(r, &rt, &mut rrt);
        for (i, row) in rrt.iter().enumerate() {
            for (j, &val) in row.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                if (val - expected).abs() > tol {
                    return false;
                }
            }
        }
        (linalg::det_mat33(r) - 1.0).abs() <= tol
    }
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}
