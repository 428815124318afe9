use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;

/// A neighbor returned by a spatial query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the neighbor in the indexed point set.
    pub index: usize,
    /// Euclidean distance to the query point.
    pub distance: f64,
}

/// Read-only k-d tree over a 3D point set.
///
/// Built once per cloud; queries are safe to run concurrently. If the
/// underlying cloud changes the index must be rebuilt.
pub struct SpatialIndex {
    tree: Option<ImmutableKdTree<f64, u32, 3, 32>>,
    len: usize,
}

impl SpatialIndex {
    /// Build an index over the given points.
    pub fn build(points: &[[f64; 3]]) -> Self {
        let tree = if points.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(points))
        };
        Self {
            tree,
            len: points.len(),
        }
    }

    /// Number of indexed points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the index holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Find the nearest indexed point to `query`.
    ///
    /// Returns `None` only for an empty index.
    pub fn nearest_one(&self, query: &[f64; 3]) -> Option<Neighbor> {
        let tree = self.tree.as_ref()?;
        let nn = tree.nearest_one::<SquaredEuclidean>(query);
        Some(Neighbor {
            index: nn.item as usize,
            distance: nn.distance.sqrt(),
        })
    }

    /// Find the `k` nearest indexed points to `query`, closest first.
    pub fn nearest_n(&self, query: &[f64; 3], k: usize) -> Vec<Neighbor> {
        let Some(tree) = self.tree.as_ref() else {
            return Vec::new();
        };
        let Some(k) = std::num::NonZero::new(k) else {
            return Vec::new();
        };
        tree.nearest_n::<SquaredEuclidean>(query, k)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
            .collect()
    }

    /// Find all indexed points within `radius` of `query`, closest first.
    pub fn within_radius(&self, query: &[f64; 3], radius: f64) -> Vec<Neighbor> {
        let Some(tree) = self.tree.as_ref() else {
            return Vec::new();
        };
        tree.within::<SquaredEuclidean>(query, radius * radius)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
            .collect()
    }

    /// Hybrid query: up to `max_nn` points within `radius`, closest first,
    /// whichever constraint binds first.
    pub fn hybrid(&self, query: &[f64; 3], radius: f64, max_nn: usize) -> Vec<Neighbor> {
        let mut neighbors = self.within_radius(query, radius);
        neighbors.truncate(max_nn);
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_points() -> Vec<[f64; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [2.0, 2.0, 0.0],
        ]
    }

    #[test]
    fn test_nearest_one() {
        let index = SpatialIndex::build(&grid_points());
        let nn = index.nearest_one(&[0.9, 0.1, 0.0]).unwrap();
        assert_eq!(nn.index, 1);
        assert_relative_eq!(nn.distance, (0.01f64 + 0.01).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_nearest_n_sorted() {
        let index = SpatialIndex::build(&grid_points());
        let neighbors = index.nearest_n(&[0.0, 0.0, 0.0], 3);
        assert_eq!(neighbors.len(), 3);
        assert_eq!(neighbors[0].index, 0);
        assert!(neighbors[0].distance <= neighbors[1].distance);
        assert!(neighbors[1].distance <= neighbors[2].distance);
    }

    #[test]
    fn test_within_radius() {
        let index = SpatialIndex::build(&grid_points());
        let neighbors = index.within_radius(&[0.0, 0.0, 0.0], 1.5);
        assert_eq!(neighbors.len(), 3);
        // the far corner is outside the radius
        assert!(neighbors.iter().all(|n| n.index != 3));
    }

    #[test]
    fn test_hybrid_caps_count() {
        let index = SpatialIndex::build(&grid_points());
        let neighbors = index.hybrid(&[0.0, 0.0, 0.0], 10.0, 2);
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].index, 0);
    }

    #[test]
    fn test_empty_index() {
        let index = SpatialIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.nearest_one(&[0.0, 0.0, 0.0]).is_none());
        assert!(index.nearest_n(&[0.0, 0.0, 0.0], 5).is_empty());
        assert!(index.within_radius(&[0.0, 0.0, 0.0], 1.0).is_empty());
        assert!(index.hybrid(&[0.0, 0.0, 0.0], 1.0, 5).is_empty());
    }
}
