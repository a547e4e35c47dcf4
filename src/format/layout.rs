//! Scene blob constants and record layouts.

use bytemuck::{Pod, Zeroable};

/// Magic number at the start of every preprocessed scene blob.
pub const SCENE_MAGIC: u32 = 0x5555_5555;

/// Size of the magic + header region (padded).
pub const HEADER_REGION: u64 = 256;

/// Serialized size of [`StagingHeader`] (six u32 + four u64).
pub const STAGING_HEADER_SIZE: usize = 6 * 4 + 4 * 8;

/// Texture index meaning "slot unused".
pub const NO_TEXTURE: u32 = u32::MAX;

/// Number of texture slots per material.
pub const NUM_TEXTURE_SLOTS: usize = 8;

/// Sizes and offsets of the staged payload.
///
/// All offsets are relative to the start of the payload (the first
/// 256-byte boundary after the metadata).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingHeader {
    pub num_vertices: u32,
    pub num_indices: u32,
    pub num_meshes: u32,
    pub num_objects: u32,
    pub num_materials: u32,
    pub reserved: u32,
    pub index_offset: u64,
    pub material_offset: u64,
    pub material_bytes: u64,
    pub total_bytes: u64,
}

/// Slice of the shared index buffer belonging to one mesh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeshInfo {
    /// First index (in indices, not bytes) of this mesh.
    pub index_offset: u32,
    pub num_triangles: u32,
    pub num_vertices: u32,
}

/// Object = contiguous run of meshes sharing one BLAS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    pub mesh_index: u32,
    pub num_meshes: u32,
}

/// Vertex record in the staged payload (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Material record in the staged payload (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub emissive_strength: f32,
    pub reserved: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: [1.0; 4],
            metallic: 0.0,
            roughness: 1.0,
            emissive_strength: 0.0,
            reserved: 0.0,
        }
    }
}

/// Texture slots, in blob order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSlot {
    Base,
    MetallicRoughness,
    Specular,
    Normal,
    Emittance,
    Transmission,
    Clearcoat,
    Anisotropic,
}

impl TextureSlot {
    /// All slots in blob order.
    pub const ALL: [TextureSlot; NUM_TEXTURE_SLOTS] = [
        TextureSlot::Base,
        TextureSlot::MetallicRoughness,
        TextureSlot::Specular,
        TextureSlot::Normal,
        TextureSlot::Emittance,
        TextureSlot::Transmission,
        TextureSlot::Clearcoat,
        TextureSlot::Anisotropic,
    ];

    /// Position of this slot in per-material tables.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            TextureSlot::Base => "base",
            TextureSlot::MetallicRoughness => "metallic_roughness",
            TextureSlot::Specular => "specular",
            TextureSlot::Normal => "normal",
            TextureSlot::Emittance => "emittance",
            TextureSlot::Transmission => "transmission",
            TextureSlot::Clearcoat => "clearcoat",
            TextureSlot::Anisotropic => "anisotropic",
        }
    }
}

/// Material metadata block: per-slot name lists and per-material indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureMetadata {
    /// Texture file names for each slot (relative to the scene directory).
    pub names: [Vec<String>; NUM_TEXTURE_SLOTS],
    /// Per material, an index into `names[slot]` or [`NO_TEXTURE`].
    pub materials: Vec<[u32; NUM_TEXTURE_SLOTS]>,
    /// Equirectangular environment map sampled by rays that hit nothing.
    pub env_map: Option<String>,
}

impl TextureMetadata {
    /// Texture name referenced by `material` in `slot`, if any.
    pub fn texture_name(&self, material: usize, slot: TextureSlot) -> Option<&str> {
        let idx = *self.materials.get(material)?.get(slot.index())?;
        if idx == NO_TEXTURE {
            return None;
        }
        self.names[slot.index()].get(idx as usize).map(String::as_str)
    }
}

/// Default light stored in the blob.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightDesc {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Default instance stored in the blob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDesc {
    pub object: u32,
    pub material: u32,
    /// Column-major 4x3 world transform.
    pub transform: [f32; 12],
}

impl InstanceDesc {
    /// Identity column-major 4x3 transform.
    pub const IDENTITY: [f32; 12] = [
        1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        0.0, 0.0, 1.0, //
        0.0, 0.0, 0.0,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        assert_eq!(std::mem::size_of::<Material>(), 32);
        assert_eq!(STAGING_HEADER_SIZE, 56);
    }

    #[test]
    fn test_texture_name_lookup() {
        let mut meta = TextureMetadata::default();
        meta.names[TextureSlot::Base.index()] = vec!["wood.png".into()];
        let mut row = [NO_TEXTURE; NUM_TEXTURE_SLOTS];
        row[TextureSlot::Base.index()] = 0;
        meta.materials.push(row);
        meta.materials.push([NO_TEXTURE; NUM_TEXTURE_SLOTS]);

        assert_eq!(meta.texture_name(0, TextureSlot::Base), Some("wood.png"));
        assert_eq!(meta.texture_name(0, TextureSlot::Normal), None);
        assert_eq!(meta.texture_name(1, TextureSlot::Base), None);
        assert_eq!(meta.texture_name(5, TextureSlot::Base), None);
    }
}
