use std::collections::HashMap;

use crate::error::CloudError;
use crate::linalg::normalize3;
use crate::pointcloud::PointCloud;

// Accumulated per-voxel data: point sum, normal sum, count.
type VoxelData = ([f64; 3], [f64; 3], usize);

/// Downsample a point cloud on a uniform voxel grid with cubic cells of
/// edge `voxel_size`, keeping the centroid of each occupied cell.
///
/// Normals, when present, are averaged per cell and renormalized. Output
/// order follows the sorted voxel indices, so the result is deterministic
/// for identical input and voxel size.
///
/// # Errors
///
/// Returns [`CloudError::InvalidVoxelSize`] for a non-positive voxel size
/// and [`CloudError::EmptyPointCloud`] for an empty input.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f64) -> Result<PointCloud, CloudError> {
    if !(voxel_size > 0.0) {
        return Err(CloudError::InvalidVoxelSize(voxel_size));
    }
    if cloud.is_empty() {
        return Err(CloudError::EmptyPointCloud {
            stage: "voxel_downsample",
        });
    }

    let mut grid: HashMap<(i64, i64, i64), VoxelData> = HashMap::new();

    for (i, point) in cloud.points().iter().enumerate() {
        let key = voxel_index(point, voxel_size);
        let entry = grid.entry(key).or_insert(([0.0; 3], [0.0; 3], 0));
        entry.0[0] += point[0];
        entry.0[1] += point[1];
        entry.0[2] += point[2];
        if let Some(normals) = cloud.normals() {
            entry.1[0] += normals[i][0];
            entry.1[1] += normals[i][1];
            entry.1[2] += normals[i][2];
        }
        entry.2 += 1;
    }

    // sorted keys keep the output order independent of hash state
    let mut keys: Vec<_> = grid.keys().copied().collect();
    keys.sort_unstable();

    let mut points = Vec::with_capacity(keys.len());
    let mut normals = cloud.normals().map(|_| Vec::with_capacity(keys.len()));

    for key in keys {
        let (sum, normal_sum, count) = grid[&key];
        let inv_count = 1.0 / count as f64;
        points.push([
            sum[0] * inv_count,
            sum[1] * inv_count,
            sum[2] * inv_count,
        ]);
        if let Some(normals) = &mut normals {
            normals.push(normalize3(&[
                normal_sum[0] * inv_count,
                normal_sum[1] * inv_count,
                normal_sum[2] * inv_count,
            ]));
        }
    }

    log::debug!(
        "voxel_downsample: {} -> {} points (voxel size {})",
        cloud.len(),
        points.len(),
        voxel_size
    );

    PointCloud::new(points, normals)
}

/// Compute the voxel index of a point for a given voxel size.
#[inline]
pub fn voxel_index(point: &[f64; 3], voxel_size: f64) -> (i64, i64, i64) {
    (
        (point[0] / voxel_size).floor() as i64,
        (point[1] / voxel_size).floor() as i64,
        (point[2] / voxel_size).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_merges_cell() -> Result<(), CloudError> {
        let cloud = PointCloud::from_points(vec![[1.0, 1.0, 1.0], [1.1, 1.1, 1.1]]);
        let down = voxel_downsample(&cloud, 1.0)?;
        assert_eq!(down.len(), 1);
        let centroid = down.points()[0];
        assert!((centroid[0] - 1.05).abs() < 1e-9);
        assert!((centroid[1] - 1.05).abs() < 1e-9);
        assert!((centroid[2] - 1.05).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_downsample_never_grows() -> Result<(), CloudError> {
        let points: Vec<[f64; 3]> = (0..100)
            .map(|_| {
                [
                    rand::random::<f64>() * 4.0,
                    rand::random::<f64>() * 4.0,
                    rand::random::<f64>() * 4.0,
                ]
            })
            .collect();
        let cloud = PointCloud::from_points(points.clone());
        let down = voxel_downsample(&cloud, 0.5)?;
        assert!(down.len() <= cloud.len());

        // each output point stays within one cell of some input point
        for p in down.points() {
            let key = voxel_index(p, 0.5);
            assert!(points.iter().any(|q| voxel_index(q, 0.5) == key));
        }
        Ok(())
    }

    #[test]
    fn test_downsample_deterministic() -> Result<(), CloudError> {
        let points: Vec<[f64; 3]> = (0..200)
            .map(|i| {
                let f = i as f64;
                [f.sin() * 3.0, f.cos() * 3.0, (f * 0.1).sin()]
            })
            .collect();
        let cloud = PointCloud::from_points(points);
        let a = voxel_downsample(&cloud, 0.7)?;
        let b = voxel_downsample(&cloud, 0.7)?;
        assert_eq!(a.points(), b.points());
        Ok(())
    }

    #[test]
    fn test_downsample_normals_renormalized() -> Result<(), CloudError> {
        let cloud = PointCloud::new(
            vec![[0.1, 0.1, 0.1], [0.2, 0.2, 0.2]],
            Some(vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
        )?;
        let down = voxel_downsample(&cloud, 1.0)?;
        let normals = down.normals().unwrap();
        assert_eq!(normals.len(), 1);
        let norm = (normals[0][0].powi(2) + normals[0][1].powi(2) + normals[0][2].powi(2)).sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_invalid_voxel_size() {
        let cloud = PointCloud::from_points(vec![[0.0, 0.0, 0.0]]);
        assert!(voxel_downsample(&cloud, 0.0).is_err());
        assert!(voxel_downsample(&cloud, -1.0).is_err());
    }

    #[test]
    fn test_empty_cloud() {
        let cloud = PointCloud::from_points(vec![]);
        assert!(voxel_downsample(&cloud, 1.0).is_err());
    }
}
