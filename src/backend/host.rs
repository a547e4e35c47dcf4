//! CPU reference backend.
//!
//! Executes the same contract as the GPU backend on the rayon pool: the
//! "device" copies are plain host snapshots taken at upload time, streams
//! complete immediately, and rendering walks the host TLAS.

use std::any::Any;
use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use super::{env_backend, scene_backend, BackendKind, EnvironmentBackend, LoadedScene, LoaderBackend};
use super::{RenderBackend, SceneBackend};
use crate::accel::{intersect_tlas, Ray, Tlas, MASK_ALL};
use crate::config::RenderConfig;
use crate::environment::Environment;
use crate::format::{SceneLoadData, TextureSlot};
use crate::loader::{resolve_texture_table, PreparedScene};
use crate::renderer::FrameImage;
use crate::scene::Scene;
use crate::shade::{env_map_uv, pack_rgba8, shade, surface_point, PackedLight, MISS_COLOR};
use crate::texture::{decode_image, AddressMode, HostTextureManager, TextureManager};
use crate::util::{Error, Result};

/// Host variant of [`RenderBackend`].
pub struct HostBackend {
    width: u32,
    height: u32,
    batch: u32,
    textures: Arc<HostTextureManager>,
    frame: FrameImage,
    frames_rendered: u64,
}

impl HostBackend {
    pub fn new(config: &RenderConfig) -> Self {
        let (width, height, batch) = (config.image_width, config.image_height, config.batch_size);
        Self {
            width,
            height,
            batch,
            textures: Arc::new(HostTextureManager::new()),
            frame: FrameImage {
                width,
                height,
                batch,
                pixels: vec![MISS_COLOR; config.pixels_per_batch() as usize],
            },
            frames_rendered: 0,
        }
    }

    /// Shared texture cache.
    pub fn textures(&self) -> &Arc<HostTextureManager> {
        &self.textures
    }

    fn render_view(&self, env: &Environment, out: &mut [u32]) -> Result<()> {
        let host_env = env_backend::<HostEnvironment>(env, BackendKind::Host)?;
        let scene = env.scene();
        let host_scene = scene_backend::<HostScene>(scene, BackendKind::Host)?;
        let camera = env.camera().pack();
        let (w, h) = (self.width, self.height);
        let mesh = scene.mesh();
        let env_map = host_scene.textures.get(scene.env_map());
        let miss = |dir: Vec3| match &env_map {
            Some(t) => {
                let uv = env_map_uv(dir);
                let s = t.sample(uv.x, uv.y);
                pack_rgba8(Vec3::new(s[0], s[1], s[2]))
            }
            None => MISS_COLOR,
        };

        out.par_chunks_mut(w as usize).enumerate().for_each(|(y, row)| {
            for (x, px) in row.iter_mut().enumerate() {
                let dir = camera.ray_direction(x as u32, y as u32, w, h);
                let ray = Ray::new(camera.position(), dir);
                let Some(hit) = intersect_tlas(&host_env.tlas, scene.blases(), &mesh, &ray, MASK_ALL) else {
                    *px = miss(dir);
                    continue;
                };
                let inst = &host_env.tlas.instances()[hit.instance_index as usize];
                let surface = surface_point(&mesh, &hit, &inst.transform, dir);
                let material = scene.materials().get(hit.material as usize).copied().unwrap_or_default();
                let mut base = Vec3::from_slice(&material.base_color[..3]);
                let tex = scene.texture(hit.material, TextureSlot::Base);
                if let Some(t) = host_scene.textures.get(tex) {
                    let s = t.sample(surface.uv.x, surface.uv.y);
                    base *= Vec3::new(s[0], s[1], s[2]);
                }
                let position = ray.origin + dir * hit.t;
                *px = shade(base, position, surface.normal, &host_env.lights);
            }
        });
        Ok(())
    }
}

impl RenderBackend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn make_loader(&self) -> Box<dyn LoaderBackend> {
        Box::new(HostLoader { textures: Arc::clone(&self.textures) })
    }

    fn make_environment(&self, scene: &Arc<Scene>) -> Result<Box<dyn EnvironmentBackend>> {
        scene_backend::<HostScene>(scene, BackendKind::Host)?;
        let lights = scene.env_init().lights.iter().map(|l| l.pack()).collect();
        Ok(Box::new(HostEnvironment {
            tlas: scene.default_tlas().clone(),
            lights,
            generation: 0,
        }))
    }

    #[tracing::instrument(skip_all, fields(batch = envs.len(), frame = self.frames_rendered))]
    fn render(&mut self, envs: &[&Environment]) -> Result<()> {
        if envs.len() != self.batch as usize {
            return Err(Error::BatchSizeMismatch { expected: self.batch as usize, actual: envs.len() });
        }
        let n = self.width as usize * self.height as usize;
        let mut pixels = std::mem::take(&mut self.frame.pixels);
        let result = pixels
            .chunks_mut(n)
            .zip(envs)
            .try_for_each(|(out, env)| self.render_view(env, out));
        self.frame.pixels = pixels;
        result?;
        self.frames_rendered += 1;
        Ok(())
    }

    fn frame(&self) -> Result<FrameImage> {
        Ok(self.frame.clone())
    }
}

/// Host loader: textures go into the backend's shared cache.
pub struct HostLoader {
    textures: Arc<HostTextureManager>,
}

impl LoaderBackend for HostLoader {
    fn load_scene(&mut self, data: &SceneLoadData, _prepared: &PreparedScene) -> Result<LoadedScene> {
        let textures = &self.textures;
        let texture_table = resolve_texture_table(data, |path, format| {
            textures.load(path, format, AddressMode::Wrap, &mut (), decode_image)
        });
        Ok(LoadedScene {
            backend: Box::new(HostScene { textures: Arc::clone(textures) }),
            texture_table,
        })
    }
}

/// Host scene resources.
pub struct HostScene {
    textures: Arc<HostTextureManager>,
}

impl SceneBackend for HostScene {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Host environment resources: the last uploaded TLAS and the light array.
pub struct HostEnvironment {
    tlas: Tlas,
    lights: Vec<PackedLight>,
    /// Bumped on every TLAS upload.
    generation: u32,
}

impl HostEnvironment {
    /// Light array in dense order.
    pub fn lights(&self) -> &[PackedLight] {
        &self.lights
    }
}

impl EnvironmentBackend for HostEnvironment {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    fn add_light(&mut self, light: &PackedLight) -> Result<()> {
        self.lights.push(*light);
        Ok(())
    }

    fn remove_light(&mut self, slot: usize) -> Result<()> {
        let count = self.lights.len();
        if slot >= count {
            return Err(Error::OutOfRange { what: "light", index: slot, count });
        }
        self.lights.swap_remove(slot);
        Ok(())
    }

    fn upload_tlas(&mut self, tlas: &Tlas, _scene: &Scene) -> Result<()> {
        self.tlas = tlas.clone();
        self.generation = self.generation.wrapping_add(1);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    fn traversable(&self) -> u32 {
        self.generation
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
