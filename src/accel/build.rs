//! Binned SAH BVH builder and refit.
//!
//! Builds a flat node array over arbitrary primitive bounds. The same
//! builder serves bottom-level (triangles) and top-level (instances)
//! accelerators; only the build options differ.

use bytemuck::Zeroable;

use super::bvh::{Aabb, BvhNode};
use crate::util::{Error, Result};

/// Number of SAH bins for split evaluation.
const NUM_BINS: usize = 12;

/// Cost ratio: traversal vs intersection (typical GPU values).
const TRAVERSAL_COST: f32 = 1.0;
const INTERSECT_COST: f32 = 1.0;

/// Deepest leaf any build produces (root = depth 0).
///
/// Traversal stacks hold one pending sibling per level, so this must stay
/// below their size.
pub const MAX_BVH_DEPTH: usize = 48;

/// Build policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Maximum primitives per leaf before forcing a split.
    pub max_leaf_size: usize,
    /// Use SAH splits (slower build, faster trace). Otherwise median splits.
    pub prefer_fast_trace: bool,
    /// Keep the structure refittable.
    pub allow_update: bool,
}

impl BuildOptions {
    /// Policy for per-object accelerators.
    pub const BOTTOM_LEVEL: Self = Self {
        max_leaf_size: 4,
        prefer_fast_trace: true,
        allow_update: false,
    };

    /// Policy for instance accelerators.
    pub const TOP_LEVEL: Self = Self {
        max_leaf_size: 2,
        prefer_fast_trace: true,
        allow_update: true,
    };
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::BOTTOM_LEVEL
    }
}

/// Built BVH result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh {
    /// Flat node array (index 0 = root, empty for zero primitives).
    pub nodes: Vec<BvhNode>,
    /// Reordered primitive indices (leaves reference into this).
    pub prim_indices: Vec<u32>,
    updatable: bool,
}

/// SAH bin for evaluating split candidates.
#[derive(Clone, Copy)]
struct Bin {
    bounds: Aabb,
    count: usize,
}

impl Bin {
    const EMPTY: Self = Self { bounds: Aabb::EMPTY, count: 0 };
}

impl Bvh {
    /// Number of primitives referenced by leaves.
    #[inline]
    pub fn prim_count(&self) -> usize {
        self.prim_indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether [`Bvh::refit`] is allowed.
    #[inline]
    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    /// Depth of the deepest leaf (0 for a single leaf or an empty BVH).
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = Vec::new();
        if !self.nodes.is_empty() {
            stack.push((0usize, 0usize));
        }
        while let Some((i, d)) = stack.pop() {
            let node = &self.nodes[i];
            if node.is_leaf() {
                deepest = deepest.max(d);
            } else {
                let left = node.left_or_first as usize;
                stack.push((left, d + 1));
                stack.push((left + 1, d + 1));
            }
        }
        deepest
    }

    /// Root bounds (empty box for an empty BVH).
    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(BvhNode::aabb).unwrap_or(Aabb::EMPTY)
    }

    /// Recompute node bounds bottom-up from new primitive bounds.
    ///
    /// Topology and leaf assignment are kept; `bounds` must be indexed by
    /// original primitive index and have the same length as at build time.
    pub fn refit(&mut self, bounds: &[Aabb]) -> Result<()> {
        if !self.updatable {
            return Err(Error::invalid("BVH was built without allow_update"));
        }
        if bounds.len() != self.prim_indices.len() {
            return Err(Error::invalid(format!(
                "refit with {} primitives, built with {}",
                bounds.len(),
                self.prim_indices.len()
            )));
        }
        // Children always follow their parent, so reverse order is bottom-up.
        for i in (0..self.nodes.len()).rev() {
            let node = self.nodes[i];
            let mut bb = Aabb::EMPTY;
            if node.is_leaf() {
                let first = node.left_or_first as usize;
                for &p in &self.prim_indices[first..first + node.count as usize] {
                    bb.grow(&bounds[p as usize]);
                }
            } else {
                let left = node.left_or_first as usize;
                bb.grow(&self.nodes[left].aabb());
                bb.grow(&self.nodes[left + 1].aabb());
            }
            self.nodes[i].aabb_min = bb.min;
            self.nodes[i].aabb_max = bb.max;
        }
        Ok(())
    }
}

/// Build a BVH over primitive bounds.
///
/// Returns a flat node array + reordered primitive index list.
/// Primitives are not modified; indices map into `bounds`.
#[tracing::instrument(skip_all, fields(prim_count = bounds.len()))]
pub fn build_bvh(bounds: &[Aabb], options: &BuildOptions) -> Bvh {
    let n = bounds.len();
    if n == 0 {
        return Bvh {
            nodes: Vec::new(),
            prim_indices: Vec::new(),
            updatable: options.allow_update,
        };
    }
    let max_leaf = options.max_leaf_size.max(1);

    let centroids: Vec<[f32; 3]> = bounds.iter().map(Aabb::centroid).collect();

    // Working index array (reordered by partitioning)
    let mut indices: Vec<u32> = (0..n as u32).collect();

    // Worst case: 2*n - 1 nodes for a full binary tree
    let mut nodes: Vec<BvhNode> = Vec::with_capacity(2 * n);
    nodes.push(BvhNode::zeroed());

    struct Task {
        node_idx: usize,
        start: usize,
        end: usize, // exclusive
        depth: usize,
    }

    let mut stack = vec![Task { node_idx: 0, start: 0, end: n, depth: 0 }];

    while let Some(task) = stack.pop() {
        let (start, end) = (task.start, task.end);
        let count = end - start;
        debug_assert!(task.depth <= MAX_BVH_DEPTH, "BVH depth {} over limit", task.depth);

        let mut node_aabb = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            node_aabb.grow(&bounds[idx as usize]);
        }

        if count <= max_leaf {
            nodes[task.node_idx] = BvhNode::leaf(&node_aabb, start, count);
            continue;
        }

        let mut centroid_bounds = Aabb::EMPTY;
        for &idx in &indices[start..end] {
            centroid_bounds.grow_point(centroids[idx as usize]);
        }

        // SAH children may be as large as this node; once they could no
        // longer finish within the depth limit, halve by count instead.
        let sah_fits = task.depth + 1 + median_height(count, max_leaf) <= MAX_BVH_DEPTH;

        let mid = if options.prefer_fast_trace && sah_fits {
            let (best_axis, best_split_pos, best_cost) =
                find_best_split(&indices[start..end], bounds, &centroids, &centroid_bounds);

            let leaf_cost = count as f32 * INTERSECT_COST * node_aabb.area();
            if best_axis == usize::MAX || best_cost >= leaf_cost {
                // Degenerate or SAH prefers a leaf; still honour the leaf cap.
                (start + end) / 2
            } else {
                partition(&mut indices[start..end], |&idx| {
                    centroids[idx as usize][best_axis] < best_split_pos
                }) + start
            }
        } else {
            start + median_split(&mut indices[start..end], &centroids, &centroid_bounds)
        };

        // Fallback: if partition is degenerate, split in middle
        let mid = if mid == start || mid == end { (start + end) / 2 } else { mid };

        let left_idx = nodes.len();
        let right_idx = left_idx + 1;
        nodes.push(BvhNode::zeroed());
        nodes.push(BvhNode::zeroed());
        nodes[task.node_idx] = BvhNode::interior(&node_aabb, left_idx);

        // Push right first so left is processed first (depth-first)
        let depth = task.depth + 1;
        stack.push(Task { node_idx: right_idx, start: mid, end, depth });
        stack.push(Task { node_idx: left_idx, start, end: mid, depth });
    }

    Bvh {
        nodes,
        prim_indices: indices,
        updatable: options.allow_update,
    }
}

/// Levels needed below a node of `count` primitives when every split halves it.
fn median_height(count: usize, max_leaf: usize) -> usize {
    count.div_ceil(max_leaf).next_power_of_two().trailing_zeros() as usize
}

/// Split at the count median along the longest centroid axis.
/// Returns the size of the left half.
fn median_split(indices: &mut [u32], centroids: &[[f32; 3]], centroid_bounds: &Aabb) -> usize {
    let axis = centroid_bounds.longest_axis();
    let half = indices.len() / 2;
    indices.select_nth_unstable_by(half, |&a, &b| {
        centroids[a as usize][axis].total_cmp(&centroids[b as usize][axis])
    });
    half
}

/// SAH binned split search across all 3 axes.
/// Returns (best_axis, split_position, cost). axis=usize::MAX if no valid split.
fn find_best_split(
    indices: &[u32],
    bounds: &[Aabb],
    centroids: &[[f32; 3]],
    centroid_bounds: &Aabb,
) -> (usize, f32, f32) {
    let mut best_axis = usize::MAX;
    let mut best_pos = 0.0f32;
    let mut best_cost = f32::INFINITY;

    for axis in 0..3 {
        let extent = centroid_bounds.max[axis] - centroid_bounds.min[axis];
        if extent < 1e-8 {
            continue; // degenerate axis
        }

        let mut bins = [Bin::EMPTY; NUM_BINS];
        let inv_extent = NUM_BINS as f32 / extent;

        for &idx in indices {
            let idx = idx as usize;
            let bin_id = ((centroids[idx][axis] - centroid_bounds.min[axis]) * inv_extent) as usize;
            let bin_id = bin_id.min(NUM_BINS - 1);
            bins[bin_id].bounds.grow(&bounds[idx]);
            bins[bin_id].count += 1;
        }

        // Sweep from left: prefix areas and counts
        let mut left_area = [0.0f32; NUM_BINS - 1];
        let mut left_count = [0usize; NUM_BINS - 1];
        let mut sweep = Aabb::EMPTY;
        let mut sweep_count = 0;
        for i in 0..NUM_BINS - 1 {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            left_area[i] = sweep.area();
            left_count[i] = sweep_count;
        }

        // Sweep from right and evaluate SAH cost
        sweep = Aabb::EMPTY;
        sweep_count = 0;
        for i in (1..NUM_BINS).rev() {
            sweep.grow(&bins[i].bounds);
            sweep_count += bins[i].count;
            if left_count[i - 1] == 0 || sweep_count == 0 {
                continue;
            }
            let cost = TRAVERSAL_COST
                + INTERSECT_COST
                    * (left_count[i - 1] as f32 * left_area[i - 1]
                        + sweep_count as f32 * sweep.area());

            if cost < best_cost {
                best_cost = cost;
                best_axis = axis;
                best_pos = centroid_bounds.min[axis] + (i as f32 / NUM_BINS as f32) * extent;
            }
        }
    }

    (best_axis, best_pos, best_cost)
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
