//! Word images of accelerators and scene tables as the tracer reads them.
//!
//! ```text
//! BLAS image      [node_count, prim_count, 0 x6] nodes[8 words] prims[u32]
//! TLAS image      [node_count, instance_count, nodes_rel, instances_rel, 0 x4]
//!                 nodes[8 words] instances[16 words] (leaf order)
//! instance record world_to_object rows (12 f32), blas addr, material, mask, id
//! scene header    vertices, indices, materials, texture table, num_materials, 0 x11
//! texture image   [width, height, format, address_mode] texels (rgba8 u32)
//! ```
//!
//! TLAS images only use indices relative to their own start, so a default
//! TLAS image can be copied verbatim into any environment's allocation.

use bytemuck::{Pod, Zeroable};

use crate::accel::{Blas, Tlas};
use crate::camera::PackedCamera;
use crate::texture::{AddressMode, DecodedImage, TextureFormat};
use crate::util::world_to_object_rows;

pub const IMAGE_HEADER_WORDS: usize = 8;
pub const NODE_WORDS: usize = 8;
pub const INSTANCE_WORDS: usize = 16;
pub const SCENE_HEADER_WORDS: usize = 16;
pub const TEXTURE_HEADER_WORDS: usize = 4;

/// Per-slot launch record (matches `EnvParams` in the kernel).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuEnvParams {
    pub tlas: u32,
    pub scene: u32,
    pub lights: u32,
    pub light_count: u32,
    pub camera: PackedCamera,
}

/// Frame constants (matches `FrameInfo`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GpuFrameInfo {
    pub width: u32,
    pub height: u32,
    pub batch: u32,
    pub frame: u32,
}

pub fn blas_image(blas: &Blas) -> Vec<u32> {
    let nodes = &blas.bvh().nodes;
    let prims = blas.prims();
    let mut out = Vec::with_capacity(IMAGE_HEADER_WORDS + nodes.len() * NODE_WORDS + prims.len());
    out.extend_from_slice(&[nodes.len() as u32, prims.len() as u32, 0, 0, 0, 0, 0, 0]);
    out.extend_from_slice(bytemuck::cast_slice(nodes));
    out.extend_from_slice(prims);
    out
}

/// TLAS image; `blas_addrs[object]` is the heap address of each BLAS image.
pub fn tlas_image(tlas: &Tlas, blas_addrs: &[u32]) -> Vec<u32> {
    let nodes = &tlas.bvh().nodes;
    let nodes_rel = IMAGE_HEADER_WORDS;
    let instances_rel = nodes_rel + nodes.len() * NODE_WORDS;
    let mut out = Vec::with_capacity(instances_rel + tlas.len() * INSTANCE_WORDS);
    out.extend_from_slice(&[
        nodes.len() as u32,
        tlas.len() as u32,
        nodes_rel as u32,
        instances_rel as u32,
        0,
        0,
        0,
        0,
    ]);
    out.extend_from_slice(bytemuck::cast_slice(nodes));
    for inst in tlas.leaf_ordered() {
        let rows = world_to_object_rows(&inst.transform);
        out.extend_from_slice(bytemuck::cast_slice(&rows));
        out.push(blas_addrs.get(inst.object as usize).copied().unwrap_or(0));
        out.push(inst.material);
        out.push(inst.flags.mask());
        out.push(inst.id);
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SceneHeader {
    pub vertices: u32,
    pub indices: u32,
    pub materials: u32,
    /// Environment map handle, then 8 handles per material.
    pub texture_table: u32,
    pub num_materials: u32,
}

impl SceneHeader {
    pub fn words(&self) -> [u32; SCENE_HEADER_WORDS] {
        let mut w = [0; SCENE_HEADER_WORDS];
        w[..5].copy_from_slice(&[
            self.vertices,
            self.indices,
            self.materials,
            self.texture_table,
            self.num_materials,
        ]);
        w
    }
}

pub fn texture_image(image: &DecodedImage, format: TextureFormat, address_mode: AddressMode) -> Vec<u32> {
    let mut out = Vec::with_capacity(TEXTURE_HEADER_WORDS + image.pixels.len() / 4);
    out.extend_from_slice(&[image.width, image.height, format.tag(), address_mode.tag()]);
    out.extend(
        image
            .pixels
            .chunks_exact(4)
            .map(|p| u32::from_le_bytes([p[0], p[1], p[2], p[3]])),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{InstanceFlags, TlasInstance, TriangleMesh};
    use crate::format::{MeshInfo, Vertex};
    use glam::{Affine3A, Vec3};

    fn tri_blas() -> Blas {
        let v = |p: [f32; 3]| Vertex { position: p, normal: [0.0, 0.0, 1.0], uv: [0.0; 2] };
        let vertices = [v([0.0, 0.0, 0.0]), v([1.0, 0.0, 0.0]), v([0.0, 1.0, 0.0])];
        let indices = [0u32, 1, 2];
        Blas::build(
            &TriangleMesh::new(&vertices, &indices),
            &[MeshInfo { index_offset: 0, num_triangles: 1, num_vertices: 3 }],
        )
    }

    #[test]
    fn test_blas_image_layout() {
        let blas = tri_blas();
        let img = blas_image(&blas);
        assert_eq!(img[0], 1);
        assert_eq!(img[1], 1);
        assert_eq!(img.len(), IMAGE_HEADER_WORDS + NODE_WORDS + 1);
        assert_eq!(*img.last().unwrap(), 0);
    }

    #[test]
    fn test_tlas_image_records() {
        let blases = vec![tri_blas()];
        let instances = (0..3)
            .map(|i| TlasInstance {
                object: 0,
                material: i,
                transform: Affine3A::from_translation(Vec3::new(i as f32 * 3.0, 0.0, 0.0)),
                flags: if i == 1 { InstanceFlags::Transparent } else { InstanceFlags::Opaque },
                id: 10 + i,
            })
            .collect();
        let tlas = Tlas::build(instances, &blases).unwrap();
        let img = tlas_image(&tlas, &[4096]);
        let nodes = img[0] as usize;
        assert_eq!(img[1], 3);
        assert_eq!(img[2] as usize, IMAGE_HEADER_WORDS);
        assert_eq!(img[3] as usize, IMAGE_HEADER_WORDS + nodes * NODE_WORDS);
        assert_eq!(img.len(), img[3] as usize + 3 * INSTANCE_WORDS);

        let mut ids: Vec<u32> = (0..3)
            .map(|k| {
                let rec = img[3] as usize + k * INSTANCE_WORDS;
                assert_eq!(img[rec + 12], 4096);
                let id = img[rec + 15];
                let mask = img[rec + 14];
                assert_eq!(mask, if id == 11 { 2 } else { 1 });
                id
            })
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_param_sizes() {
        assert_eq!(std::mem::size_of::<GpuEnvParams>(), 64);
        assert_eq!(std::mem::size_of::<GpuFrameInfo>(), 16);
    }
}
