//! Bounding boxes and the flat BVH node shared by bottom- and top-level
//! accelerators.
//!
//! Flat array layout used on both host and device:
//! - 32-byte nodes (cache-line friendly)
//! - children of a node are adjacent (`left`, `left + 1`)

use bytemuck::{Pod, Zeroable};
use glam::{Affine3A, Vec3};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    /// Box around a single point.
    #[inline]
    pub fn from_point(p: [f32; 3]) -> Self {
        Self { min: p, max: p }
    }

    /// Box around a triangle.
    #[inline]
    pub fn from_triangle(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> Self {
        let mut bb = Self::from_point(a);
        bb.grow_point(b);
        bb.grow_point(c);
        bb
    }

    /// True if no point has been added yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0] || self.min[1] > self.max[1] || self.min[2] > self.max[2]
    }

    /// Grow to include a point.
    #[inline]
    pub fn grow_point(&mut self, p: [f32; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    /// Grow to include another AABB.
    #[inline]
    pub fn grow(&mut self, other: &Aabb) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(other.min[i]);
            self.max[i] = self.max[i].max(other.max[i]);
        }
    }

    /// Surface area (for SAH cost).
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        2.0 * (dx * dy + dy * dz + dz * dx)
    }

    /// Longest axis (0=x, 1=y, 2=z).
    #[inline]
    pub fn longest_axis(&self) -> usize {
        let dx = self.max[0] - self.min[0];
        let dy = self.max[1] - self.min[1];
        let dz = self.max[2] - self.min[2];
        if dx >= dy && dx >= dz {
            0
        } else if dy >= dz {
            1
        } else {
            2
        }
    }

    /// Centroid of the AABB.
    #[inline]
    pub fn centroid(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// World-space box enclosing this box under `xf` (all eight corners).
    ///
    /// An empty box maps to a point at the transform's origin so instances of
    /// empty objects still get finite bounds.
    pub fn transformed(&self, xf: &Affine3A) -> Aabb {
        if self.is_empty() {
            return Aabb::from_point(xf.translation.to_array());
        }
        let mut out = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min[0] } else { self.max[0] },
                if i & 2 == 0 { self.min[1] } else { self.max[1] },
                if i & 4 == 0 { self.min[2] } else { self.max[2] },
            );
            out.grow_point(xf.transform_point3(corner).to_array());
        }
        out
    }

    /// Slab test. Returns the entry distance if the ray overlaps `[t_min, t_max]`.
    #[inline]
    pub fn intersect(&self, origin: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let bmin = Vec3::from(self.min);
        let bmax = Vec3::from(self.max);
        let t0 = (bmin - origin) * inv_dir;
        let t1 = (bmax - origin) * inv_dir;
        let near = t0.min(t1).max_element().max(t_min);
        let far = t0.max(t1).min_element().min(t_max);
        (near <= far).then_some(near)
    }
}

/// GPU-friendly BVH node (32 bytes, matches the WGSL layout).
///
/// Internal node: left_or_first = left child index, count = 0
/// Leaf node: left_or_first = first primitive slot, count > 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BvhNode {
    pub aabb_min: [f32; 3],
    pub left_or_first: u32,
    pub aabb_max: [f32; 3],
    pub count: u32,
}

impl BvhNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.count > 0
    }

    #[inline]
    pub fn aabb(&self) -> Aabb {
        Aabb { min: self.aabb_min, max: self.aabb_max }
    }

    pub(crate) fn leaf(bounds: &Aabb, first: usize, count: usize) -> Self {
        Self {
            aabb_min: bounds.min,
            left_or_first: first as u32,
            aabb_max: bounds.max,
            count: count as u32,
        }
    }

    pub(crate) fn interior(bounds: &Aabb, left: usize) -> Self {
        Self {
            aabb_min: bounds.min,
            left_or_first: left as u32,
            aabb_max: bounds.max,
            count: 0,
        }
    }
}
