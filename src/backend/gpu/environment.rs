//! Per-environment device resources: working TLAS and light array.

use std::any::Any;
use std::sync::Arc;

use super::memory::{DeviceAlloc, DeviceHeap};
use super::pack::tlas_image;
use super::scene::GpuScene;
use super::stream::CommandStream;
use crate::accel::Tlas;
use crate::backend::{scene_backend, BackendKind, EnvironmentBackend};
use crate::scene::Scene;
use crate::shade::PackedLight;
use crate::util::{Error, Result};

const LIGHT_BYTES: u64 = std::mem::size_of::<PackedLight>() as u64;

/// Device side of an [`crate::Environment`].
pub struct GpuEnvironment {
    heap: Arc<DeviceHeap>,
    stream: CommandStream,
    tlas: DeviceAlloc,
    /// Host mirror of the device light array.
    lights: Vec<PackedLight>,
    light_alloc: Option<DeviceAlloc>,
    scene_header: u32,
}

impl GpuEnvironment {
    /// Relocate the scene's default TLAS image and default lights into
    /// fresh allocations.
    pub fn new(scene: &Arc<Scene>) -> Result<Self> {
        let gpu_scene = scene_backend::<GpuScene>(scene, BackendKind::Gpu)?;
        let heap = Arc::clone(gpu_scene.heap());
        let mut stream = CommandStream::new(Arc::clone(heap.context()), "rtbatch_environment");

        let image = gpu_scene.default_tlas_image();
        let tlas = heap.alloc(image.len() as u64 * 4)?;
        stream.upload_words(&tlas, 0, image)?;

        let mut env = Self {
            heap,
            stream,
            tlas,
            lights: scene.env_init().lights.iter().map(|l| l.pack()).collect(),
            light_alloc: None,
            scene_header: gpu_scene.header_addr(),
        };
        if !env.lights.is_empty() {
            env.grow_lights(env.lights.len())?;
        }
        env.stream.submit();
        Ok(env)
    }

    #[inline]
    pub fn heap(&self) -> &Arc<DeviceHeap> {
        &self.heap
    }

    #[inline]
    pub fn scene_header(&self) -> u32 {
        self.scene_header
    }

    /// Heap address of the light array (0 when empty).
    pub fn lights_addr(&self) -> u32 {
        match &self.light_alloc {
            Some(a) if !self.lights.is_empty() => a.addr(0),
            _ => 0,
        }
    }

    #[inline]
    pub fn light_count(&self) -> u32 {
        self.lights.len() as u32
    }

    fn light_capacity(&self) -> usize {
        self.light_alloc.as_ref().map_or(0, |a| (a.size() / LIGHT_BYTES) as usize)
    }

    /// Reallocate for at least `needed` lights (doubling) and upload the mirror.
    fn grow_lights(&mut self, needed: usize) -> Result<()> {
        let capacity = needed.max(self.light_capacity() * 2).max(4);
        let alloc = self.heap.alloc(capacity as u64 * LIGHT_BYTES)?;
        self.stream.upload(&alloc, 0, bytemuck::cast_slice(&self.lights))?;
        self.light_alloc = Some(alloc);
        Ok(())
    }

    fn upload_light(&mut self, slot: usize) -> Result<()> {
        let Some(alloc) = &self.light_alloc else {
            return Ok(());
        };
        self.stream
            .upload(alloc, slot as u64 * LIGHT_BYTES, bytemuck::bytes_of(&self.lights[slot]))
    }
}

impl EnvironmentBackend for GpuEnvironment {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn add_light(&mut self, light: &PackedLight) -> Result<()> {
        self.lights.push(*light);
        if self.lights.len() > self.light_capacity() {
            self.grow_lights(self.lights.len())
        } else {
            self.upload_light(self.lights.len() - 1)
        }
    }

    fn remove_light(&mut self, slot: usize) -> Result<()> {
        let count = self.lights.len();
        if slot >= count {
            return Err(Error::OutOfRange { what: "light", index: slot, count });
        }
        self.lights.swap_remove(slot);
        if slot < self.lights.len() {
            self.upload_light(slot)?;
        }
        Ok(())
    }

    fn upload_tlas(&mut self, tlas: &Tlas, scene: &Scene) -> Result<()> {
        let gpu_scene = scene_backend::<GpuScene>(scene, BackendKind::Gpu)?;
        let image = tlas_image(tlas, gpu_scene.blas_addrs());
        let bytes = image.len() as u64 * 4;
        if bytes > self.tlas.size() {
            self.tlas = self.heap.alloc(bytes.max(self.tlas.size() * 2))?;
        }
        self.stream.upload_words(&self.tlas, 0, &image)?;
        self.stream.submit();
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.stream.synchronize()
    }

    fn traversable(&self) -> u32 {
        self.tlas.addr(0)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
