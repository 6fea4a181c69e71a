//! Spatial index for nearest-neighbour queries on spot coordinates.
//!
//! Shift scoring and ICP both ask one question, many times: which target spot
//! is closest to this (transformed) base spot? The k-d tree is built once per
//! target cloud and shared read-only across threads.

use glam::DVec3;


/// Nearest-neighbour query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the points the tree was built from.
    pub index: usize,
    pub dist_sq: f64,
}

impl Neighbor {
    #[inline]
    pub fn distance(&self) -> f64 {
        self.dist_sq.sqrt()
    }
}

/// A 3-D k-d tree over spot positions.
#[derive(Debug)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    points: Vec<DVec3>,
}

#[derive(Debug, Clone)]
struct KdNode {
    /// Index into the points array
    point_idx: usize,
    left: Option<usize>,
    right: Option<usize>,
    /// Split axis (0 = x, 1 = y, 2 = z)
    split_dim: usize,
}

impl KdTree {
    /// Build a k-d tree with median splits cycling through x, y, z.
    ///
    /// Returns `None` if `points` is empty.
    pub fn build(points: &[DVec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        Self::build_recursive(points, &mut indices, 0, &mut nodes);

        Some(Self {
            nodes,
            points: points.to_vec(),
        })
    }

    fn build_recursive(
        points: &[DVec3],
        indices: &mut [usize],
        depth: usize,
        nodes: &mut Vec<KdNode>,
    ) -> Option<usize> {
        if indices.is_empty() {
            return None;
        }

        let split_dim = depth % 3;
        let median = indices.len() / 2;
        indices.select_nth_unstable_by(median, |&a, &b| {
            points[a][split_dim].total_cmp(&points[b][split_dim])
        });

        let node_idx = nodes.len();
        nodes.push(KdNode {
            point_idx: indices[median],
            left: None,
            right: None,
            split_dim,
        });

        let (left_indices, right_part) = indices.split_at_mut(median);
        let right_indices = &mut right_part[1..];

        let left = Self::build_recursive(points, left_indices, depth + 1, nodes);
        let right = Self::build_recursive(points, right_indices, depth + 1, nodes);

        nodes[node_idx].left = left;
        nodes[node_idx].right = right;

        Some(node_idx)
    }

    /// Closest point to `query`. Ties resolve to the first point visited.
    pub fn nearest(&self, query: DVec3) -> Neighbor {
        let mut best = Neighbor {
            index: usize::MAX,
            dist_sq: f64::INFINITY,
        };
        self.nearest_recursive(0, query, &mut best);
        best
    }

    fn nearest_recursive(&self, node_idx: usize, query: DVec3, best: &mut Neighbor) {
        let node = &self.nodes[node_idx];
        let point = self.points[node.point_idx];

        let dist_sq = point.distance_squared(query);
        if dist_sq < best.dist_sq {
            *best = Neighbor {
                index: node.point_idx,
                dist_sq,
            };
        }

        let diff = query[node.split_dim] - point[node.split_dim];
        let (first, second) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        if let Some(first_idx) = first {
            self.nearest_recursive(first_idx, query, best);
        }

        // The far side can only help if the splitting plane is closer than the best so far.
        if let Some(second_idx) = second {
            if diff * diff < best.dist_sq {
                self.nearest_recursive(second_idx, query, best);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, idx: usize) -> DVec3 {
        self.points[idx]
    }
}
