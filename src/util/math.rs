//! Math type re-exports and layout helpers.
//!
//! This module re-exports the `glam` types used throughout the crate and
//! provides the alignment and 4x3 transform helpers shared by the scene
//! format and the device packers.

pub use glam::{Affine3A, Mat3, Mat3A, Mat4, Vec2, Vec3, Vec3A, Vec4};

/// Byte alignment of every section in the scene blob and every heap allocation.
pub const SECTION_ALIGN: u64 = 256;

/// Round `value` up to the next multiple of `align` (power of two).
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// Round `value` up to the next multiple of `align` (power of two).
#[inline]
pub const fn align_up_usize(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Build an affine transform from a column-major 4x3 matrix
/// (four columns of three floats: x axis, y axis, z axis, translation).
#[inline]
pub fn affine_from_cols(cols: &[f32; 12]) -> Affine3A {
    Affine3A::from_cols_array(cols)
}

/// Flatten an affine transform into a column-major 4x3 matrix.
#[inline]
pub fn affine_to_cols(xf: &Affine3A) -> [f32; 12] {
    xf.to_cols_array()
}

/// Inverse of an affine transform as three row vectors `[r0, r1, r2]`
/// where `p_object = (dot(r_i.xyz, p_world) + r_i.w)`.
///
/// This is the layout the tracer consumes for world-to-object ray transforms.
pub fn world_to_object_rows(xf: &Affine3A) -> [[f32; 4]; 3] {
    let inv = xf.inverse();
    let m = inv.matrix3;
    let t = inv.translation;
    [
        [m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x],
        [m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y],
        [m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 16), 272);
        assert_eq!(align_up_usize(33, 32), 64);
    }

    #[test]
    fn test_cols_round_trip() {
        let xf = Affine3A::from_scale_rotation_translation(
            Vec3::new(1.0, 2.0, 3.0),
            glam::Quat::from_rotation_y(0.5),
            Vec3::new(4.0, 5.0, 6.0),
        );
        let back = affine_from_cols(&affine_to_cols(&xf));
        assert!(back.abs_diff_eq(xf, 1e-6));
    }

    #[test]
    fn test_world_to_object_rows() {
        let xf = Affine3A::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let rows = world_to_object_rows(&xf);
        let p = Vec3::new(1.0, 2.0, 3.0);
        let obj = Vec3::new(
            rows[0][0] * p.x + rows[0][1] * p.y + rows[0][2] * p.z + rows[0][3],
            rows[1][0] * p.x + rows[1][1] * p.y + rows[1][2] * p.z + rows[1][3],
            rows[2][0] * p.x + rows[2][1] * p.y + rows[2][2] * p.z + rows[2][3],
        );
        assert!(obj.length() < 1e-6);
    }
}
