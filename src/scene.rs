//! Immutable scene shared by many environments.

use std::sync::Arc;

use crate::accel::{Blas, Tlas, TriangleMesh};
use crate::backend::SceneBackend;
use crate::environment::{Instance, Light};
use crate::format::{Material, MeshInfo, ObjectInfo, TextureSlot, Vertex, NUM_TEXTURE_SLOTS};
use crate::texture::TextureHandle;

/// Per-material texture handles, one per [`TextureSlot`].
pub type TextureRow = [TextureHandle; NUM_TEXTURE_SLOTS];

/// Resolved texture handles of a scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureTable {
    /// Sampled on a miss; null when the scene has no environment map.
    pub env_map: TextureHandle,
    /// One row per material.
    pub materials: Vec<TextureRow>,
}

impl TextureTable {
    /// Device layout: the environment map first, then the material rows.
    pub fn words(&self) -> Vec<u32> {
        std::iter::once(self.env_map.0)
            .chain(self.materials.iter().flatten().map(|h| h.0))
            .collect()
    }
}

/// Shared geometry arrays (host copy).
#[derive(Debug, Clone, Default)]
pub struct SceneGeometry {
    pub vertices: Vec<Vertex>,
    /// Global indices, three per triangle.
    pub indices: Vec<u32>,
    pub meshes: Vec<MeshInfo>,
    pub objects: Vec<ObjectInfo>,
}

impl SceneGeometry {
    #[inline]
    pub fn mesh(&self) -> TriangleMesh<'_> {
        TriangleMesh::new(&self.vertices, &self.indices)
    }

    /// Meshes making up `object`.
    pub fn object_meshes(&self, object: usize) -> &[MeshInfo] {
        match self.objects.get(object) {
            Some(o) => {
                let start = o.mesh_index as usize;
                &self.meshes[start..start + o.num_meshes as usize]
            }
            None => &[],
        }
    }
}

/// Data needed to seed a new environment.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentInit {
    /// Default instances in blob order; a fresh environment issues handle
    /// `i` for `instances[i]`.
    pub instances: Vec<Instance>,
    pub lights: Vec<Light>,
}

/// Read-only scene produced by a loader.
///
/// Owned through `Arc`: every environment created from the scene holds a
/// reference, so device resources are released only after the last one is
/// dropped.
pub struct Scene {
    geometry: SceneGeometry,
    materials: Vec<Material>,
    texture_table: TextureTable,
    blases: Vec<Blas>,
    default_tlas: Tlas,
    env_init: EnvironmentInit,
    backend: Box<dyn SceneBackend>,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("vertices", &self.geometry.vertices.len())
            .field("triangles", &(self.geometry.indices.len() / 3))
            .field("objects", &self.geometry.objects.len())
            .field("materials", &self.materials.len())
            .field("default_instances", &self.env_init.instances.len())
            .field("backend", &self.backend.kind())
            .finish()
    }
}

impl Scene {
    pub(crate) fn new(
        geometry: SceneGeometry,
        materials: Vec<Material>,
        texture_table: TextureTable,
        blases: Vec<Blas>,
        default_tlas: Tlas,
        env_init: EnvironmentInit,
        backend: Box<dyn SceneBackend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            geometry,
            materials,
            texture_table,
            blases,
            default_tlas,
            env_init,
            backend,
        })
    }

    #[inline]
    pub fn geometry(&self) -> &SceneGeometry {
        &self.geometry
    }

    #[inline]
    pub fn mesh(&self) -> TriangleMesh<'_> {
        self.geometry.mesh()
    }

    #[inline]
    pub fn num_objects(&self) -> usize {
        self.geometry.objects.len()
    }

    #[inline]
    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    #[inline]
    pub fn num_materials(&self) -> usize {
        self.materials.len()
    }

    /// Texture handle table, one row per material.
    #[inline]
    pub fn texture_table(&self) -> &[TextureRow] {
        &self.texture_table.materials
    }

    /// Environment map handle (null if none).
    #[inline]
    pub fn env_map(&self) -> TextureHandle {
        self.texture_table.env_map
    }

    /// Texture bound to `material` in `slot` (null if none).
    pub fn texture(&self, material: u32, slot: TextureSlot) -> TextureHandle {
        self.texture_table
            .materials
            .get(material as usize)
            .map(|row| row[slot.index()])
            .unwrap_or(TextureHandle::NULL)
    }

    /// One bottom-level accelerator per object.
    #[inline]
    pub fn blases(&self) -> &[Blas] {
        &self.blases
    }

    /// Accelerator over the default instance list.
    #[inline]
    pub fn default_tlas(&self) -> &Tlas {
        &self.default_tlas
    }

    #[inline]
    pub fn env_init(&self) -> &EnvironmentInit {
        &self.env_init
    }

    /// Backend-specific device resources.
    #[inline]
    pub fn backend(&self) -> &dyn SceneBackend {
        self.backend.as_ref()
    }
}
