//! Shading model shared by both backends, plus the packed light record.
//!
//! Miss: the scene's environment map sampled along the ray direction
//! (equirectangular, nearest), or transparent black without one. Hit: base colour (material x base texture)
//! times ambient plus the sum of `max(n.l, 0) * color` over all lights in
//! dense order. Normals are two-sided.

use bytemuck::{Pod, Zeroable};
use std::f32::consts::{PI, TAU};

use glam::{Affine3A, Vec2, Vec3};

use crate::accel::{Hit, TriangleMesh};
use crate::format::Vertex;

/// Constant ambient term.
pub const AMBIENT: f32 = 0.1;

/// Background pixel value.
pub const MISS_COLOR: u32 = 0;

/// Two float4s: `[color.rgb, pos.x]`, `[pos.y, pos.z, 0, 0]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PackedLight {
    pub data: [[f32; 4]; 2],
}

impl PackedLight {
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            data: [
                [color.x, color.y, color.z, position.x],
                [position.y, position.z, 0.0, 0.0],
            ],
        }
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.data[0][3], self.data[1][0], self.data[1][1])
    }

    #[inline]
    pub fn color(&self) -> Vec3 {
        Vec3::new(self.data[0][0], self.data[0][1], self.data[0][2])
    }
}

/// Pack linear RGB in `[0, 1]` into little-endian RGBA8 with opaque alpha.
#[inline]
pub fn pack_rgba8(c: Vec3) -> u32 {
    let q = |x: f32| (x.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    q(c.x) | (q(c.y) << 8) | (q(c.z) << 16) | (255 << 24)
}

/// Equirectangular texture coordinate of a world-space direction.
///
/// `u` runs around the +Y axis starting at -X, `v` from +Y (0) to -Y (1).
#[inline]
pub fn env_map_uv(dir: Vec3) -> Vec2 {
    let d = dir.normalize_or_zero();
    let u = 0.5 + d.z.atan2(d.x) / TAU;
    let v = d.y.clamp(-1.0, 1.0).acos() / PI;
    Vec2::new(u, v)
}

/// Interpolated vertex attributes at a hit.
#[derive(Debug, Clone, Copy)]
pub struct SurfacePoint {
    /// World-space unit normal facing the incoming ray.
    pub normal: Vec3,
    pub uv: Vec2,
}

/// Interpolate the shading normal and UV of `hit`.
pub fn surface_point(mesh: &TriangleMesh<'_>, hit: &Hit, transform: &Affine3A, ray_dir: Vec3) -> SurfacePoint {
    let [i0, i1, i2] = mesh.triangle_indices(hit.primitive);
    let v0: &Vertex = &mesh.vertices[i0 as usize];
    let v1: &Vertex = &mesh.vertices[i1 as usize];
    let v2: &Vertex = &mesh.vertices[i2 as usize];
    let (b1, b2) = (hit.barycentrics.x, hit.barycentrics.y);
    let b0 = 1.0 - b1 - b2;

    let mut n = Vec3::from(v0.normal) * b0 + Vec3::from(v1.normal) * b1 + Vec3::from(v2.normal) * b2;
    if n.length_squared() < 1e-12 {
        let p0 = Vec3::from(v0.position);
        n = (Vec3::from(v1.position) - p0).cross(Vec3::from(v2.position) - p0);
    }
    let normal_xf = transform.matrix3.inverse().transpose();
    let mut normal = (normal_xf * n).normalize_or_zero();
    if normal.dot(ray_dir) > 0.0 {
        normal = -normal;
    }

    let uv = Vec2::from(v0.uv) * b0 + Vec2::from(v1.uv) * b1 + Vec2::from(v2.uv) * b2;
    SurfacePoint { normal, uv }
}

/// Final colour of a hit point.
pub fn shade(base_color: Vec3, position: Vec3, normal: Vec3, lights: &[PackedLight]) -> u32 {
    let mut irradiance = Vec3::splat(AMBIENT);
    for light in lights {
        let l = (light.position() - position).normalize_or_zero();
        irradiance += normal.dot(l).max(0.0) * light.color();
    }
    pack_rgba8(base_color * irradiance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_rgba8() {
        assert_eq!(pack_rgba8(Vec3::ZERO), 0xFF00_0000);
        assert_eq!(pack_rgba8(Vec3::new(1.0, 0.0, 0.0)), 0xFF00_00FF);
        assert_eq!(pack_rgba8(Vec3::splat(2.0)), 0xFFFF_FFFF);
    }

    #[test]
    fn test_packed_light_layout() {
        let l = PackedLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 0.6, 0.7));
        assert_eq!(l.data[0], [0.5, 0.6, 0.7, 1.0]);
        assert_eq!(l.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(std::mem::size_of::<PackedLight>(), 32);
    }

    #[test]
    fn test_env_map_uv_poles_and_horizon() {
        assert!(env_map_uv(Vec3::Y).y.abs() < 1e-6);
        assert!((env_map_uv(-Vec3::Y).y - 1.0).abs() < 1e-6);
        let forward = env_map_uv(Vec3::Z);
        assert!((forward - Vec2::new(0.75, 0.5)).length() < 1e-6);
        let right = env_map_uv(Vec3::X);
        assert!((right - Vec2::new(0.5, 0.5)).length() < 1e-6);
    }

    #[test]
    fn test_ambient_only_and_lit() {
        let dark = shade(Vec3::ONE, Vec3::ZERO, Vec3::Z, &[]);
        assert_eq!(dark & 0xFF, 26); // 0.1 * 255 rounded
        let lit = shade(
            Vec3::ONE,
            Vec3::ZERO,
            Vec3::Z,
            &[PackedLight::new(Vec3::new(0.0, 0.0, 5.0), Vec3::splat(0.5))],
        );
        assert_eq!(lit & 0xFF, 153); // 0.6 * 255 rounded
        // light behind the surface adds nothing
        let behind = shade(
            Vec3::ONE,
            Vec3::ZERO,
            Vec3::Z,
            &[PackedLight::new(Vec3::new(0.0, 0.0, -5.0), Vec3::ONE)],
        );
        assert_eq!(behind, dark);
    }
}
