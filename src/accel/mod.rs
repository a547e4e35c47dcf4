//! Acceleration structures.
//!
//! Provides the bottom-level (per object) and top-level (per instance set)
//! BVHs, the SAH builder they share, and host traversal.
//!
//! ## Architecture
//! ```text
//! Triangles → Blas::build (SAH, leaf 4) ─┐
//!                                        ├→ Tlas::build / refit (SAH, leaf 2) → device image
//! Instances (transform, object, mask) ───┘
//! ```

mod blas;
mod build;
mod bvh;
mod tlas;
mod traverse;

pub use blas::{Blas, GeometryFlags, TriangleMesh};
pub use build::{build_bvh, BuildOptions, Bvh, MAX_BVH_DEPTH};
pub use bvh::{Aabb, BvhNode};
pub use tlas::{InstanceFlags, Tlas, TlasInstance, TlasUpdate, MASK_ALL};
pub use traverse::{intersect_blas, intersect_tlas, intersect_triangle, Hit, Ray};
