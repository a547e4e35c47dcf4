//! Pinhole camera and its packed device form.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Pinhole camera with an orthonormal basis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Unit view direction.
    pub view: Vec3,
    pub up: Vec3,
    pub right: Vec3,
    /// tan(vertical_fov / 2)
    pub tan_fov: f32,
    pub aspect_ratio: f32,
}

impl Default for Camera {
    /// Origin, looking down +Z with +Y up, 90 degree field of view, square.
    fn default() -> Self {
        Self::from_basis(Vec3::ZERO, Vec3::Z, Vec3::Y, 90.0, 1.0)
    }
}

impl Camera {
    /// Camera at `position` looking along `forward`.
    pub fn from_basis(position: Vec3, forward: Vec3, up: Vec3, vertical_fov_deg: f32, aspect_ratio: f32) -> Self {
        let view = forward.normalize();
        let right = view.cross(up).normalize();
        let up = right.cross(view);
        Self {
            position,
            view,
            up,
            right,
            tan_fov: (vertical_fov_deg.to_radians() * 0.5).tan(),
            aspect_ratio,
        }
    }

    /// Camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, vertical_fov_deg: f32, aspect_ratio: f32) -> Self {
        Self::from_basis(eye, target - eye, up, vertical_fov_deg, aspect_ratio)
    }

    /// Camera from a camera-to-world matrix (camera looks down its local -Z).
    pub fn from_matrix(camera_to_world: &Mat4, vertical_fov_deg: f32, aspect_ratio: f32) -> Self {
        let position = camera_to_world.w_axis.truncate();
        let forward = -camera_to_world.z_axis.truncate();
        let up = camera_to_world.y_axis.truncate();
        Self::from_basis(position, forward, up, vertical_fov_deg, aspect_ratio)
    }

    /// Pack into the device record, pre-scaling up/right by the half extents.
    ///
    /// `up` is negated so image row 0 is the top of the frame.
    pub fn pack(&self) -> PackedCamera {
        let su = -self.tan_fov * self.up;
        let sr = self.aspect_ratio * self.tan_fov * self.right;
        let p = self.position;
        let v = self.view;
        PackedCamera {
            data: [
                [p.x, p.y, p.z, v.x],
                [v.y, v.z, su.x, su.y],
                [su.z, sr.x, sr.y, sr.z],
            ],
        }
    }
}

/// Three float4s: `[pos.xyz, view.x]`, `[view.yz, up.xy]`, `[up.z, right.xyz]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PackedCamera {
    pub data: [[f32; 4]; 3],
}

impl PackedCamera {
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.data[0][0], self.data[0][1], self.data[0][2])
    }

    pub fn view(&self) -> Vec3 {
        Vec3::new(self.data[0][3], self.data[1][0], self.data[1][1])
    }

    pub fn scaled_up(&self) -> Vec3 {
        Vec3::new(self.data[1][2], self.data[1][3], self.data[2][0])
    }

    pub fn scaled_right(&self) -> Vec3 {
        Vec3::new(self.data[2][1], self.data[2][2], self.data[2][3])
    }

    /// Primary ray direction (unit) through the centre of pixel `(x, y)`.
    #[inline]
    pub fn ray_direction(&self, x: u32, y: u32, width: u32, height: u32) -> Vec3 {
        let u = 2.0 * (x as f32 + 0.5) / width as f32 - 1.0;
        let v = 2.0 * (y as f32 + 0.5) / height as f32 - 1.0;
        (self.view() + u * self.scaled_right() + v * self.scaled_up()).normalize()
    }
}
