//! Bottom-level accelerators: one BVH per object over its triangles.

use glam::Vec3;

use super::build::{build_bvh, BuildOptions, Bvh};
use super::bvh::Aabb;
use crate::format::{MeshInfo, Vertex};

/// Borrowed view of the scene's shared vertex/index arrays.
#[derive(Debug, Clone, Copy)]
pub struct TriangleMesh<'a> {
    pub vertices: &'a [Vertex],
    /// Global indices, three per triangle.
    pub indices: &'a [u32],
}

impl<'a> TriangleMesh<'a> {
    pub fn new(vertices: &'a [Vertex], indices: &'a [u32]) -> Self {
        Self { vertices, indices }
    }

    /// Vertex indices of global triangle `prim`.
    #[inline]
    pub fn triangle_indices(&self, prim: u32) -> [u32; 3] {
        let i = prim as usize * 3;
        [self.indices[i], self.indices[i + 1], self.indices[i + 2]]
    }

    /// Vertex positions of global triangle `prim`.
    #[inline]
    pub fn triangle(&self, prim: u32) -> [Vec3; 3] {
        self.triangle_indices(prim)
            .map(|v| Vec3::from(self.vertices[v as usize].position))
    }
}

/// Per-geometry build flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryFlags {
    /// Closest-hit only: no any-hit (alpha test) invocation for this geometry.
    pub disable_any_hit: bool,
}

impl Default for GeometryFlags {
    fn default() -> Self {
        Self { disable_any_hit: true }
    }
}

/// Accelerator over all triangles of one object (a run of meshes).
#[derive(Debug, Clone)]
pub struct Blas {
    bvh: Bvh,
    /// Global triangle index per leaf slot.
    prims: Vec<u32>,
    flags: GeometryFlags,
}

impl Blas {
    /// Build one BLAS over the triangles of the given meshes.
    #[tracing::instrument(skip_all, fields(meshes = meshes.len()))]
    pub fn build(mesh: &TriangleMesh<'_>, meshes: &[MeshInfo]) -> Self {
        let tri_ids: Vec<u32> = meshes
            .iter()
            .flat_map(|m| {
                let first = m.index_offset / 3;
                first..first + m.num_triangles
            })
            .collect();

        let bounds: Vec<Aabb> = tri_ids
            .iter()
            .map(|&t| {
                let [a, b, c] = mesh.triangle(t);
                Aabb::from_triangle(a.to_array(), b.to_array(), c.to_array())
            })
            .collect();

        let bvh = build_bvh(&bounds, &BuildOptions::BOTTOM_LEVEL);
        let prims = bvh.prim_indices.iter().map(|&i| tri_ids[i as usize]).collect();

        Self { bvh, prims, flags: GeometryFlags::default() }
    }

    /// Object-space bounds.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    #[inline]
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Global triangle index per leaf slot (BVH leaf order).
    #[inline]
    pub fn prims(&self) -> &[u32] {
        &self.prims
    }

    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.prims.len()
    }

    #[inline]
    pub fn flags(&self) -> GeometryFlags {
        self.flags
    }
}
