/// Transform a set of points using a rotation and translation.
///
/// # Arguments
///
/// * `src_points` - A set of points to be transformed.
/// * `dst_r_src` - A rotation matrix.
/// * `dst_t_src` - A translation vector.
/// * `dst_points` - A pre-allocated slice to store the transformed points.
///
/// PRECONDITION: `dst_points` has the same length as `src_points`.
pub fn transform_points(
    src_points: &[[f64; 3]],
    dst_r_src: &[[f64; 3]; 3],
    dst_t_src: &[f64; 3],
    dst_points: &mut [[f64; 3]],
) {
    assert_eq!(src_points.len(), dst_points.len());
    if src_points.is_empty() {
        return;
    }

    // create views of the rotation matrix
    let dst_r_src_mat = {
        let rotation_slice = unsafe {
            std::slice::from_raw_parts(dst_r_src.as_ptr() as *const f64, dst_r_src.len() * 3)
        };
        faer::mat::from_row_major_slice(rotation_slice, 3, 3)
    };

    // create view of the source points
    let points_in_src = {
        let src_points_slice = unsafe {
            std::slice::from_raw_parts(src_points.as_ptr() as *const f64, src_points.len() * 3)
        };
        // SAFETY: src_points_slice is an Nx3 matrix where each row represents a 3D point
        faer::mat::from_row_major_slice(src_points_slice, src_points.len(), 3)
    };

    // create a mutable view of the destination points
    let mut points_in_dst = {
        let dst_points_slice = unsafe {
            std::slice::from_raw_parts_mut(
                dst_points.as_mut_ptr() as *mut f64,
                dst_points.len() * 3,
            )
        };
        // SAFETY: dst_points_slice is a 3xN matrix where each column represents a 3D point
        faer::mat::from_column_major_slice_mut(dst_points_slice, 3, dst_points.len())
    };

    // perform the matrix multiplication
    faer::linalg::matmul::matmul(
        &mut points_in_dst,
        dst_r_src_mat,
        points_in_src.transpose(),
        None,
        1.0,
        faer::Parallelism::None,
    );

    let (tx, ty, tz) = (dst_t_src[0], dst_t_src[1], dst_t_src[2]);

    // SAFETY: points_in_dst is a 3xN matrix where each column represents a 3D point
    // The unchecked reads/writes are within bounds as we're only accessing indices 0,1,2
    for mut col in points_in_dst.col_iter_mut() {
        unsafe {
            col.write_unchecked(0, col.read_unchecked(0) + tx);
            col.write_unchecked(1, col.read_unchecked(1) + ty);
            col.write_unchecked(2, col.read_unchecked(2) + tz);
        }
    }
}

/// Multiply two 3x3 matrices, storing the result in `dst`.
pub fn matmul33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3], dst: &mut [[f64; 3]; 3]) {
    for i in 0..3 {
        for j in 0..3 {
            dst[i][j] = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
}

/// Compute the determinant of a 3x3 matrix.
pub fn det_mat33(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Compute the dot product of two 3D vectors.
#[inline]
pub fn dot3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Compute the cross product of two 3D vectors.
#[inline]
pub fn cross3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Utility function to compute the Euclidean distance between two points.
#[inline]
pub fn euclidean_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Normalize a 3D vector to unit length.
///
/// Returns the input unchanged when its magnitude is below 1e-12.
#[inline]
pub fn normalize3(v: &[f64; 3]) -> [f64; 3] {
    let norm = dot3(v, v).sqrt();
    if norm < 1e-12 {
        return *v;
    }
    [v[0] / norm, v[1] / norm, v[2] / norm]
}

/// Compute the rotation matrix from an axis and angle.
///
/// A zero axis yields the identity rotation.
pub fn axis_angle_to_rotation_matrix(axis: &[f64; 3], angle: f64) -> [[f64; 3]; 3] {
    let magnitude = dot3(axis, axis).sqrt();
    if magnitude < 1e-12 {
        return [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    }
    let x = axis[0] / magnitude;
    let y = axis[1] / magnitude;
    let z = axis[2] / magnitude;

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    [
        [
            c + x * x * t,
            x * y * t - z * s,
            x * z * t + y * s,
        ],
        [
            x * y * t + z * s,
            c + y * y * t,
            y * z * t - x * s,
        ],
        [
            x * z * t - y * s,
            y * z * t + x * s,
            c + z * z * t,
        ],
    ]
}
