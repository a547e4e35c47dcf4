//! Scene loading.
//!
//! Loading happens in two phases: host preparation (blob → geometry arrays,
//! per-object BLASes built in parallel, default TLAS) which is backend
//! independent, then a backend upload that places everything in device
//! memory and resolves the material texture table.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;

use crate::accel::{Blas, Tlas};
use crate::backend::LoaderBackend;
use crate::environment::{derive_tlas_instances, flags_for_material, seed_instances, Instance, Light};
use crate::format::{Material, SceneLoadData, TextureSlot, NUM_TEXTURE_SLOTS};
use crate::scene::{EnvironmentInit, Scene, SceneGeometry, TextureTable};
use crate::texture::{TextureFormat, TextureHandle};
use crate::util::{affine_from_cols, Result};

/// Host-side result of preparing a scene blob.
#[derive(Debug, Clone)]
pub struct PreparedScene {
    pub geometry: SceneGeometry,
    pub materials: Vec<Material>,
    /// One per object, in object order.
    pub blases: Vec<Blas>,
    pub default_tlas: Tlas,
    pub env_init: EnvironmentInit,
}

/// Build the backend-independent part of a scene.
#[tracing::instrument(skip_all, fields(objects = data.objects.len(), instances = data.instances.len()))]
pub fn prepare_scene(data: &SceneLoadData) -> Result<PreparedScene> {
    let geometry = SceneGeometry {
        vertices: data.vertices(),
        indices: data.indices(),
        meshes: data.meshes.clone(),
        objects: data.objects.clone(),
    };
    let materials = data.materials();

    let blases: Vec<Blas> = {
        let mesh = geometry.mesh();
        (0..geometry.objects.len())
            .into_par_iter()
            .map(|object| Blas::build(&mesh, geometry.object_meshes(object)))
            .collect()
    };

    let instances: Vec<Instance> = data
        .instances
        .iter()
        .map(|desc| Instance {
            object: desc.object,
            material: desc.material,
            transform: affine_from_cols(&desc.transform),
            flags: flags_for_material(materials.get(desc.material as usize)),
        })
        .collect();
    let lights: Vec<Light> = data
        .lights
        .iter()
        .map(|l| Light { position: l.position.into(), color: l.color.into() })
        .collect();

    // Same derivation an environment performs, so a fresh environment can
    // refit the cloned default TLAS directly.
    let arena = seed_instances(geometry.objects.len(), &instances)?;
    let default_tlas = Tlas::build(derive_tlas_instances(&arena), &blases)?;

    tracing::info!(
        triangles = geometry.indices.len() / 3,
        blases = blases.len(),
        default_instances = default_tlas.len(),
        "scene prepared"
    );

    Ok(PreparedScene {
        geometry,
        materials,
        blases,
        default_tlas,
        env_init: EnvironmentInit { instances, lights },
    })
}

/// Path a texture name resolves to.
pub fn texture_path(data: &SceneLoadData, name: &str) -> PathBuf {
    match &data.base_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Resolve the environment map and the per-material texture table.
///
/// `load` is called once per distinct (slot, name) pair with the slot's
/// storage format. Failures are logged and resolve to the null handle.
pub fn resolve_texture_table<F>(data: &SceneLoadData, mut load: F) -> TextureTable
where
    F: FnMut(&Path, TextureFormat) -> Result<TextureHandle>,
{
    let env_map = match &data.textures.env_map {
        Some(name) => {
            let path = texture_path(data, name);
            load(&path, TextureFormat::Rgba32Float).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), %err, "environment map unresolved");
                TextureHandle::NULL
            })
        }
        None => TextureHandle::NULL,
    };

    let mut resolved: [Vec<Option<TextureHandle>>; NUM_TEXTURE_SLOTS] =
        std::array::from_fn(|s| vec![None; data.textures.names[s].len()]);

    let mut table = Vec::with_capacity(data.textures.materials.len());
    for row in &data.textures.materials {
        let mut handles = [TextureHandle::NULL; NUM_TEXTURE_SLOTS];
        for slot in TextureSlot::ALL {
            let s = slot.index();
            let Some(cached) = resolved[s].get_mut(row[s] as usize) else {
                continue;
            };
            let handle = *cached.get_or_insert_with(|| {
                let name = &data.textures.names[s][row[s] as usize];
                let path = texture_path(data, name);
                load(&path, TextureFormat::for_slot(slot)).unwrap_or_else(|err| {
                    tracing::warn!(slot = slot.name(), path = %path.display(), %err, "texture unresolved");
                    TextureHandle::NULL
                })
            });
            handles[s] = handle;
        }
        table.push(handles);
    }
    TextureTable { env_map, materials: table }
}

/// Turns scene blobs into shared [`Scene`]s on one backend.
pub struct Loader {
    backend: Box<dyn LoaderBackend>,
}

impl Loader {
    pub(crate) fn new(backend: Box<dyn LoaderBackend>) -> Self {
        Self { backend }
    }

    /// Open, validate and load a scene blob. Texture names resolve against
    /// the blob's directory.
    #[tracing::instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn load_scene(&mut self, path: impl AsRef<Path>) -> Result<Arc<Scene>> {
        let path = path.as_ref();
        let mut data = SceneLoadData::open(path)?;
        if let Some(dir) = path.parent() {
            data = data.with_base_dir(dir);
        }
        self.load_scene_data(&data)
    }

    /// Load an already parsed blob.
    pub fn load_scene_data(&mut self, data: &SceneLoadData) -> Result<Arc<Scene>> {
        let prepared = prepare_scene(data)?;
        let loaded = self.backend.load_scene(data, &prepared)?;
        let PreparedScene { geometry, materials, blases, default_tlas, env_init } = prepared;
        Ok(Scene::new(
            geometry,
            materials,
            loaded.texture_table,
            blases,
            default_tlas,
            env_init,
            loaded.backend,
        ))
    }
}
