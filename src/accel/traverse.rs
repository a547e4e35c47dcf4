//! Host-side closest-hit traversal.
//!
//! Mirrors the device traversal: stack-based descent of the TLAS, rays are
//! transformed into object space per instance, then the BLAS is descended
//! with a Möller-Trumbore triangle test (no backface culling).

use glam::{Vec2, Vec3};

use super::blas::{Blas, TriangleMesh};
use super::build::MAX_BVH_DEPTH;
use super::tlas::Tlas;

/// Traversal stack depth. Holds at most one entry per level plus the root.
const STACK_SIZE: usize = 64;

const _: () = assert!(MAX_BVH_DEPTH + 2 <= STACK_SIZE);

/// Ray with a parametric interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_min: f32,
    pub t_max: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self { origin, direction, t_min: 0.0, t_max: f32::INFINITY }
    }
}

/// Closest intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    /// External instance id.
    pub instance_id: u32,
    /// Position of the instance in [`Tlas::instances`].
    pub instance_index: u32,
    pub object: u32,
    pub material: u32,
    /// Global triangle index.
    pub primitive: u32,
    /// Barycentrics of vertices 1 and 2.
    pub barycentrics: Vec2,
}

/// Möller-Trumbore. Returns `(t, u, v)` for hits inside `(t_min, t_max)`.
#[inline]
pub fn intersect_triangle(
    origin: Vec3,
    dir: Vec3,
    [a, b, c]: [Vec3; 3],
    t_min: f32,
    t_max: f32,
) -> Option<(f32, f32, f32)> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > t_min && t < t_max).then_some((t, u, v))
}

/// Closest hit against one BLAS in object space.
pub fn intersect_blas(
    blas: &Blas,
    mesh: &TriangleMesh<'_>,
    origin: Vec3,
    dir: Vec3,
    t_min: f32,
    t_max: f32,
) -> Option<(f32, u32, f32, f32)> {
    let nodes = &blas.bvh().nodes;
    if nodes.is_empty() {
        return None;
    }
    let inv_dir = dir.recip();
    let mut best: Option<(f32, u32, f32, f32)> = None;
    let mut closest = t_max;

    let mut stack = [0u32; STACK_SIZE];
    let mut sp = 1;
    while sp > 0 {
        sp -= 1;
        let node = &nodes[stack[sp] as usize];
        if node.aabb().intersect(origin, inv_dir, t_min, closest).is_none() {
            continue;
        }
        if node.is_leaf() {
            let first = node.left_or_first as usize;
            for &prim in &blas.prims()[first..first + node.count as usize] {
                if let Some((t, u, v)) = intersect_triangle(origin, dir, mesh.triangle(prim), t_min, closest) {
                    closest = t;
                    best = Some((t, prim, u, v));
                }
            }
        } else if sp + 2 <= STACK_SIZE {
            stack[sp] = node.left_or_first + 1;
            stack[sp + 1] = node.left_or_first;
            sp += 2;
        }
    }
    best
}

/// Closest hit across a TLAS, considering only instances whose visibility
/// bit is set in `mask`.
pub fn intersect_tlas(
    tlas: &Tlas,
    blases: &[Blas],
    mesh: &TriangleMesh<'_>,
    ray: &Ray,
    mask: u32,
) -> Option<Hit> {
    let bvh = tlas.bvh();
    if bvh.is_empty() {
        return None;
    }
    let inv_dir = ray.direction.recip();
    let mut best: Option<Hit> = None;
    let mut closest = ray.t_max;

    let mut stack = [0u32; STACK_SIZE];
    let mut sp = 1;
    while sp > 0 {
        sp -= 1;
        let node = &bvh.nodes[stack[sp] as usize];
        if node.aabb().intersect(ray.origin, inv_dir, ray.t_min, closest).is_none() {
            continue;
        }
        if !node.is_leaf() {
            if sp + 2 <= STACK_SIZE {
                stack[sp] = node.left_or_first + 1;
                stack[sp + 1] = node.left_or_first;
                sp += 2;
            }
            continue;
        }
        let first = node.left_or_first as usize;
        for &slot in &bvh.prim_indices[first..first + node.count as usize] {
            let inst = &tlas.instances()[slot as usize];
            if inst.flags.mask() & mask == 0 {
                continue;
            }
            let Some(blas) = blases.get(inst.object as usize) else {
                continue;
            };
            let to_object = inst.transform.inverse();
            let o = to_object.transform_point3(ray.origin);
            let d = to_object.transform_vector3(ray.direction);
            if let Some((t, prim, u, v)) = intersect_blas(blas, mesh, o, d, ray.t_min, closest) {
                closest = t;
                best = Some(Hit {
                    t,
                    instance_id: inst.id,
                    instance_index: slot,
                    object: inst.object,
                    material: inst.material,
                    primitive: prim,
                    barycentrics: Vec2::new(u, v),
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{InstanceFlags, TlasInstance, MASK_ALL};
    use crate::format::{MeshInfo, Vertex};
    use glam::Affine3A;

    fn quad_scene() -> (Vec<Vertex>, Vec<u32>) {
        let v = |p: [f32; 3]| Vertex { position: p, normal: [0.0, 0.0, 1.0], uv: [0.0; 2] };
        let vertices = vec![
            v([-1.0, -1.0, 0.0]),
            v([1.0, -1.0, 0.0]),
            v([1.0, 1.0, 0.0]),
            v([-1.0, 1.0, 0.0]),
        ];
        (vertices, vec![0, 1, 2, 0, 2, 3])
    }

    fn setup(instances: &[(u32, f32, InstanceFlags)]) -> (Vec<Vertex>, Vec<u32>, Vec<Blas>, Tlas) {
        let (vertices, indices) = quad_scene();
        let blas = Blas::build(
            &TriangleMesh::new(&vertices, &indices),
            &[MeshInfo { index_offset: 0, num_triangles: 2, num_vertices: 4 }],
        );
        let blases = vec![blas];
        let inst: Vec<TlasInstance> = instances
            .iter()
            .map(|&(id, z, flags)| TlasInstance {
                object: 0,
                material: id,
                transform: Affine3A::from_translation(Vec3::new(0.0, 0.0, z)),
                flags,
                id,
            })
            .collect();
        let tlas = Tlas::build(inst, &blases).expect("build");
        (vertices, indices, blases, tlas)
    }

    #[test]
    fn test_triangle_hit_both_sides() {
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Y];
        let front = intersect_triangle(Vec3::new(0.2, 0.2, 1.0), -Vec3::Z, tri, 0.0, 10.0);
        let back = intersect_triangle(Vec3::new(0.2, 0.2, -1.0), Vec3::Z, tri, 0.0, 10.0);
        assert!(front.is_some());
        assert!(back.is_some());
        assert!(intersect_triangle(Vec3::new(2.0, 2.0, 1.0), -Vec3::Z, tri, 0.0, 10.0).is_none());
    }

    #[test]
    fn test_closest_instance_wins() {
        let (v, i, blases, tlas) =
            setup(&[(10, 5.0, InstanceFlags::Opaque), (11, 2.0, InstanceFlags::Opaque)]);
        let mesh = TriangleMesh::new(&v, &i);
        let ray = Ray::new(Vec3::new(0.1, 0.1, -5.0), Vec3::Z);
        let hit = intersect_tlas(&tlas, &blases, &mesh, &ray, MASK_ALL).expect("hit");
        assert_eq!(hit.instance_id, 11);
        assert!((hit.t - 7.0).abs() < 1e-5);
    }

    #[test]
    fn test_mask_filters_transparent() {
        let (v, i, blases, tlas) =
            setup(&[(1, 1.0, InstanceFlags::Transparent), (2, 4.0, InstanceFlags::Opaque)]);
        let mesh = TriangleMesh::new(&v, &i);
        let ray = Ray::new(Vec3::new(0.0, 0.3, -5.0), Vec3::Z);
        let all = intersect_tlas(&tlas, &blases, &mesh, &ray, MASK_ALL).expect("hit");
        assert_eq!(all.instance_id, 1);
        let opaque = intersect_tlas(&tlas, &blases, &mesh, &ray, InstanceFlags::Opaque.mask())
            .expect("hit");
        assert_eq!(opaque.instance_id, 2);
    }

    #[test]
    fn test_miss_and_empty() {
        let (v, i, blases, tlas) = setup(&[(0, 0.0, InstanceFlags::Opaque)]);
        let mesh = TriangleMesh::new(&v, &i);
        let away = Ray::new(Vec3::new(0.0, 0.0, -5.0), -Vec3::Z);
        assert!(intersect_tlas(&tlas, &blases, &mesh, &away, MASK_ALL).is_none());

        let empty = Tlas::build(Vec::new(), &blases).expect("build");
        let toward = Ray::new(Vec3::new(0.0, 0.0, -5.0), Vec3::Z);
        assert!(intersect_tlas(&empty, &blases, &mesh, &toward, MASK_ALL).is_none());
    }

    #[test]
    fn test_every_triangle_of_skewed_mesh_is_found() {
        // Triangles in the y = 0 plane at geometrically growing x.
        let v = |p: [f32; 3]| Vertex { position: p, normal: [0.0, 1.0, 0.0], uv: [0.0; 2] };
        let mut vertices = Vec::new();
        let mut centers = Vec::new();
        for k in 0..300 {
            let x = 1.1f32.powi(k);
            let w = x * 0.05;
            vertices.push(v([x - w, 0.0, -w]));
            vertices.push(v([x + w, 0.0, -w]));
            vertices.push(v([x, 0.0, w]));
            centers.push(x);
        }
        let indices: Vec<u32> = (0..vertices.len() as u32).collect();
        let mesh = TriangleMesh::new(&vertices, &indices);
        let blas = Blas::build(&mesh, &[MeshInfo { index_offset: 0, num_triangles: 300, num_vertices: 900 }]);
        assert!(blas.bvh().depth() <= MAX_BVH_DEPTH);

        let missed: Vec<usize> = centers
            .iter()
            .enumerate()
            .filter(|&(k, &x)| {
                let hit = intersect_blas(&blas, &mesh, Vec3::new(x, 1.0, 0.0), -Vec3::Y, 0.0, f32::INFINITY);
                hit.map(|(_, prim, _, _)| prim) != Some(k as u32)
            })
            .map(|(k, _)| k)
            .collect();
        assert!(missed.is_empty(), "missed {} of 300: {:?}", missed.len(), missed);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let (v, i, blases, tlas) = setup(&[
            (0, 0.0, InstanceFlags::Opaque),
            (1, 3.0, InstanceFlags::Opaque),
            (2, 6.0, InstanceFlags::Transparent),
        ]);
        let again = Tlas::build(tlas.instances().to_vec(), &blases).expect("rebuild");
        let mesh = TriangleMesh::new(&v, &i);
        for k in 0..32 {
            let x = (k as f32 / 16.0) - 1.0;
            let ray = Ray::new(Vec3::new(x, 0.25, -10.0), Vec3::Z);
            let a = intersect_tlas(&tlas, &blases, &mesh, &ray, MASK_ALL);
            let b = intersect_tlas(&again, &blases, &mesh, &ray, MASK_ALL);
            assert_eq!(a, b);
        }
    }
}
