//! SAH-based BVH builder and traversal.
//!
//! Constructs a flat BVH array from a list of triangles using the Surface
//! Area Heuristic for split decisions.

use super::bvh::{BvhNode, Triangle, TriangleHit};
use crate::util::{Bounds3, Vec3};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection.
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Maximum triangles per leaf before forcing a split.
const MAX_LEAF_SIZE: usize = 4;

/// Built BVH.
#[derive(Debug, Clone)]
pub struct Bvh {
    /// Flat node array (index 0 = root).
    pub nodes: Vec<BvhNode>,
    /// Reordered triangle indices (leaves reference into this).
    pub tri_indices: Vec<usize>,
}

/// Closest hit found by [`Bvh::intersect`].
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub triangle: usize,
    pub tri: TriangleHit,
}

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Bounds3,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self {
        bounds: Bounds3::EMPTY,
        count: 0,
    };
}

/// Build a BVH over `triangles`.
///
/// Triangles are not modified; leaves index into `tri_indices`, which maps
/// back into the original slice.
#[tracing::instrument(skip_all, fields(tri_count = triangles.len()))]
pub fn build_bvh(triangles: &[Triangle]) -> Bvh {
    let n = triangles.len();
    if n == 0 {
        return Bvh {
            nodes: vec![BvhNode::EMPTY],
            tri_indices: vec![],
        };
    }

    let centroids: Vec<Vec3> = triangles.iter().map(Triangle::centroid).collect();
    let bounds: Vec<Bounds3> = triangles.iter().map(Triangle::bounds).collect();

    // Working index array, reordered by partitioning
    let mut indices: Vec<usize> = (0..n).collect();
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::EMPTY);

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
    }

    let mut stack = vec![Task {
        node_idx: 0,
        start: 0,
        end: n,
    }];

    while let Some(task) = stack.pop() {
        let Task { node_idx, start, end } = task;
        let count = end - start;

        let mut node_bounds = Bounds3::EMPTY;
        for &idx in &indices[start..end] {
            node_bounds.expand_by_box(&bounds[idx]);
        }

        let leaf = BvhNode {
            bounds: node_bounds,
            left_or_first: start as u32,
            count: count as u32,
        };

        if count <= MAX_LEAF_SIZE {
            nodes[node_idx] = leaf;
            continue;
        }

        let mut centroid_bounds = Bounds3::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.expand_by_point(centroids[idx]);
        }

        let split = find_best_split(&indices[start..end], &bounds, &centroids, &centroid_bounds);
        let leaf_cost = count as f32 * INTERSECT_COST * node_bounds.area();

        let (axis, pos) = match split {
            Some((axis, pos, cost)) if cost < leaf_cost => (axis, pos),
            _ => {
                nodes[node_idx] = leaf;
                continue;
            }
        };

        let mid = partition(&mut indices[start..end], |&idx| centroids[idx][axis] < pos) + start;
        // Degenerate partition: split in the middle
        let mid = if mid == start || mid == end {
            (start + end) / 2
        } else {
            mid
        };

        let left_idx = nodes.len();
        nodes.push(BvhNode::EMPTY);
        nodes.push(BvhNode::EMPTY);
        nodes[node_idx] = BvhNode {
            bounds: node_bounds,
            left_or_first: left_idx as u32,
            count: 0,
        };

        // Right first so left is processed first
        stack.push(Task {
            node_idx: left_idx + 1,
            start: mid,
            end,
        });
        stack.push(Task {
            node_idx: left_idx,
            start,
            end: mid,
        });
    }

    Bvh {
        nodes,
        tri_indices: indices,
    }
}

/// SAH binned split search across all 3 axes.
/// Returns `(axis, split_position, cost)`, or None if every axis is degenerate.
fn find_best_split(
    indices: &[usize],
    bounds: &[Bounds3],
    centroids: &[Vec3],
    centroid_bounds: &Bounds3,
) -> Option<(usize, f32, f32)> {
    let mut best: Option<(usize, f32, f32)> = None;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue;
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin = &mut bins[bin_id.min(NUM_BINS - 1)];
            bin.bounds.expand_by_box(&bounds[idx]);
            bin.count += 1;
        }

        // Prefix sweep from the left
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Bounds3::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = if sweep.is_empty() { 0.0 } else { sweep.area() };
            left_count[i] = sweep_count;
        }

        // Sweep from the right and evaluate SAH cost
        sweep = Bounds3::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.expand_by_box(&bins[i].bounds);
            sweep_count += bins[i].count;
            let right_area = if sweep.is_empty() { 0.0 } else { sweep.area() };
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1] + sweep_count as f32 * right_area);

            if best.map_or(true, |(_, _, c)| cost < c) {
                let pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
                best = Some((axis, pos, cost));
            }
        }
    }

    best
}

/// Partition slice in-place. Returns count of elements where predicate is true.
fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}

impl Bvh {
    /// Closest intersection along the ray within `(t_min, t_max)`.
    pub fn intersect(
        &self,
        triangles: &[Triangle],
        origin: Vec3,
        dir: Vec3,
        t_min: f32,
        mut t_max: f32,
    ) -> Option<Hit> {
        let inv_dir = dir.recip();
        let mut best = None;
        self.traverse(origin, inv_dir, t_max, |slot| {
            let triangle = self.tri_indices[slot];
            if let Some(tri) = triangles[triangle].intersect(origin, dir, t_min, t_max) {
                t_max = tri.t;
                best = Some(Hit { triangle, tri });
            }
            (false, t_max)
        });
        best
    }

    /// True if anything blocks the segment `(t_min, t_max)`.
    pub fn occluded(&self, triangles: &[Triangle], origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> bool {
        let inv_dir = dir.recip();
        let mut hit = false;
        self.traverse(origin, inv_dir, t_max, |slot| {
            let triangle = self.tri_indices[slot];
            hit = triangles[triangle].intersect(origin, dir, t_min, t_max).is_some();
            (hit, t_max)
        });
        hit
    }

    /// Visit leaf slots front to back until `visit` returns true.
    /// `visit` also returns the current ray extent for culling.
    fn traverse<F>(&self, origin: Vec3, inv_dir: Vec3, mut t_max: f32, mut visit: F)
    where
        F: FnMut(usize) -> (bool, f32),
    {
        if self.tri_indices.is_empty() {
            return;
        }
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);

        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if node.bounds.intersect(origin, inv_dir, t_max).is_none() {
                continue;
            }
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for slot in first..first + node.count as usize {
                    let (stop, extent) = visit(slot);
                    if stop {
                        return;
                    }
                    t_max = extent;
                }
                continue;
            }

            let left = node.left_or_first;
            let right = left + 1;
            let dl = self.nodes[left as usize].bounds.intersect(origin, inv_dir, t_max);
            let dr = self.nodes[right as usize].bounds.intersect(origin, inv_dir, t_max);
            // Push the far child first so the near one is popped next
            match (dl, dr) {
                (Some(a), Some(b)) if a <= b => {
                    stack.push(right);
                    stack.push(left);
                }
                (Some(_), Some(_)) => {
                    stack.push(left);
                    stack.push(right);
                }
                (Some(_), None) => stack.push(left),
                (None, Some(_)) => stack.push(right),
                (None, None) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec2;

    fn make_tri(cx: f32, cy: f32, cz: f32) -> Triangle {
        Triangle {
            v: [
                Vec3::new(cx - 0.5, cy - 0.5, cz),
                Vec3::new(cx + 0.5, cy - 0.5, cz),
                Vec3::new(cx, cy + 0.5, cz),
            ],
            n: [Vec3::Z; 3],
            uv: [Vec2::ZERO; 3],
            material: 0,
        }
    }

    #[test]
    fn test_empty_bvh() {
        let bvh = build_bvh(&[]);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.tri_indices.len(), 0);
        assert!(bvh.intersect(&[], Vec3::ZERO, Vec3::Z, 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn test_single_triangle() {
        let tris = vec![make_tri(0.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes.len(), 1);
        assert_eq!(bvh.nodes[0].count, 1);
    }

    #[test]
    fn test_many_triangles_builds_tree() {
        let tris: Vec<Triangle> = (0..100).map(|i| make_tri(i as f32 * 2.0, 0.0, 0.0)).collect();
        let bvh = build_bvh(&tris);

        assert!(bvh.nodes.len() > 1, "BVH should have internal nodes");

        let mut sorted = bvh.tri_indices.clone();
        sorted.sort();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());

        let root = &bvh.nodes[0];
        assert!(root.bounds.min.x < 0.0);
        assert!(root.bounds.max.x > 198.0);
    }

    #[test]
    fn test_leaf_count_correct() {
        let tris = vec![make_tri(0.0, 0.0, 0.0), make_tri(1.0, 0.0, 0.0), make_tri(2.0, 0.0, 0.0)];
        let bvh = build_bvh(&tris);
        assert_eq!(bvh.nodes[0].count, 3);
    }

    #[test]
    fn test_traversal_finds_closest() {
        // Stack of triangles along -Z facing the ray, plus distractors along X
        let mut tris: Vec<Triangle> = (0..10).map(|i| make_tri(0.0, 0.0, -(i as f32))).collect();
        tris.extend((1..50).map(|i| make_tri(i as f32 * 3.0, 0.0, 0.0)));
        let bvh = build_bvh(&tris);

        let origin = Vec3::new(0.0, 0.0, 5.0);
        let hit = bvh
            .intersect(&tris, origin, Vec3::NEG_Z, 1e-4, f32::INFINITY)
            .unwrap();
        assert_eq!(hit.triangle, 0);
        assert!((hit.tri.t - 5.0).abs() < 1e-5);

        assert!(bvh.occluded(&tris, origin, Vec3::NEG_Z, 1e-4, 100.0));
        assert!(!bvh.occluded(&tris, origin, Vec3::NEG_Z, 1e-4, 4.0));
        assert!(!bvh.occluded(&tris, origin, Vec3::Z, 1e-4, 100.0));
    }
}
