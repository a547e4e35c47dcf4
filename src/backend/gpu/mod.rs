//! wgpu compute backend.
//!
//! Accelerators are built on the host and uploaded into one device heap;
//! a single compute pipeline (ray generation, miss and closest hit in one
//! WGSL module) traverses them. One dispatch covers `W x H x B` pixels, the
//! z dimension selecting the environment.

mod context;
mod environment;
mod frame;
mod memory;
mod pack;
mod scene;
mod stream;
mod texture;

use std::sync::Arc;

pub use context::GpuContext;
pub use environment::GpuEnvironment;
pub use frame::{FrameRing, SlotState};
pub use memory::{DeviceAlloc, DeviceHeap, RangeAllocator};
pub use scene::{GpuLoader, GpuScene};
pub use stream::CommandStream;
pub use texture::GpuTextureManager;

use pack::{GpuEnvParams, GpuFrameInfo};

use super::{env_backend, scene_backend, BackendKind, EnvironmentBackend, LoaderBackend, RenderBackend};
use crate::config::RenderConfig;
use crate::environment::Environment;
use crate::renderer::FrameImage;
use crate::scene::Scene;
use crate::util::{Error, Result};

const TRACE_WGSL: &str = include_str!("trace.wgsl");

/// Workgroup size (must match @workgroup_size in WGSL).
const WG_SIZE: u32 = 8;

/// GPU variant of [`RenderBackend`].
pub struct GpuBackend {
    ctx: Arc<GpuContext>,
    heap: Arc<DeviceHeap>,
    textures: Arc<GpuTextureManager>,
    pipeline: wgpu::ComputePipeline,
    ring: FrameRing,
    stream: CommandStream,
    width: u32,
    height: u32,
    batch: u32,
    frame_index: u32,
}

impl GpuBackend {
    #[tracing::instrument(skip_all, fields(device_id = config.device_id))]
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let ctx = GpuContext::new(config.device_id)?;
        let heap = DeviceHeap::new(Arc::clone(&ctx), config.heap_bytes)?;
        let device = &ctx.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("rtbatch_trace_shader"),
            source: wgpu::ShaderSource::Wgsl(TRACE_WGSL.into()),
        });

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rtbatch_bind_group_layout"),
            entries: &[
                // @binding(0) device heap
                storage(0, true),
                // @binding(1) per-slot environment params
                storage(1, true),
                // @binding(2) frame info uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(3) packed rgba8 output
                storage(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rtbatch_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("rtbatch_trace_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let ring = FrameRing::new(
            &ctx,
            &heap,
            &bind_group_layout,
            config.frames_in_flight as usize,
            config.batch_size,
            config.pixels_per_batch(),
        )?;
        let textures = Arc::new(GpuTextureManager::new(Arc::clone(&heap)));
        let stream = CommandStream::new(Arc::clone(&ctx), "rtbatch_render");

        Ok(Self {
            ctx,
            heap,
            textures,
            pipeline,
            ring,
            stream,
            width: config.image_width,
            height: config.image_height,
            batch: config.batch_size,
            frame_index: 0,
        })
    }

    #[inline]
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    #[inline]
    pub fn heap(&self) -> &Arc<DeviceHeap> {
        &self.heap
    }

    fn env_params(&self, env: &Environment) -> Result<GpuEnvParams> {
        let gpu_env = env_backend::<GpuEnvironment>(env, BackendKind::Gpu)?;
        if !Arc::ptr_eq(gpu_env.heap(), &self.heap) {
            return Err(Error::BackendMismatch("environment was created by another GPU backend".into()));
        }
        Ok(GpuEnvParams {
            tlas: gpu_env.traversable(),
            scene: gpu_env.scene_header(),
            lights: gpu_env.lights_addr(),
            light_count: gpu_env.light_count(),
            camera: env.camera().pack(),
        })
    }
}

impl RenderBackend for GpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn make_loader(&self) -> Box<dyn LoaderBackend> {
        Box::new(GpuLoader::new(Arc::clone(&self.heap), Arc::clone(&self.textures)))
    }

    fn make_environment(&self, scene: &Arc<Scene>) -> Result<Box<dyn EnvironmentBackend>> {
        let gpu_scene = scene_backend::<GpuScene>(scene, BackendKind::Gpu)?;
        if !Arc::ptr_eq(gpu_scene.heap(), &self.heap) {
            return Err(Error::BackendMismatch("scene was loaded by another GPU backend".into()));
        }
        Ok(Box::new(GpuEnvironment::new(scene)?))
    }

    #[tracing::instrument(skip_all, fields(batch = envs.len(), frame = self.frame_index))]
    fn render(&mut self, envs: &[&Environment]) -> Result<()> {
        if envs.len() != self.batch as usize {
            return Err(Error::BatchSizeMismatch { expected: self.batch as usize, actual: envs.len() });
        }
        let params = envs.iter().map(|env| self.env_params(env)).collect::<Result<Vec<_>>>()?;
        let info = GpuFrameInfo {
            width: self.width,
            height: self.height,
            batch: self.batch,
            frame: self.frame_index,
        };

        let slot_index = self.ring.current_index();
        let output_bytes = self.ring.output_bytes();
        let slot = self.ring.current();
        if slot.state == SlotState::DeviceOwned {
            self.ctx.wait_idle()?;
        }
        // host-owned until submission: plain writes
        self.ctx.queue.write_buffer(&slot.params, 0, bytemuck::cast_slice(&params));
        self.ctx.queue.write_buffer(&slot.info, 0, bytemuck::bytes_of(&info));

        let wg_x = self.width.div_ceil(WG_SIZE);
        let wg_y = self.height.div_ceil(WG_SIZE);
        {
            let encoder = self.stream.encoder();
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("rtbatch_trace_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &slot.bind_group, &[]);
                pass.dispatch_workgroups(wg_x, wg_y, self.batch);
            }
            encoder.copy_buffer_to_buffer(&slot.output, 0, &slot.readback, 0, output_bytes);
        }
        slot.state = SlotState::DeviceOwned;
        tracing::trace!(slot = slot_index, "frame dispatched");

        self.stream.synchronize()?;
        self.ring.advance();
        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(())
    }

    fn frame(&self) -> Result<FrameImage> {
        let (width, height, batch) = (self.width, self.height, self.batch);
        let Some(slot) = self.ring.last() else {
            let n = width as usize * height as usize * batch as usize;
            return Ok(FrameImage { width, height, batch, pixels: vec![crate::shade::MISS_COLOR; n] });
        };

        let slice = slot.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.ctx.wait_idle()?;
        rx.recv()
            .map_err(|_| Error::device("map_async channel closed"))?
            .map_err(|e| Error::device(format!("readback map failed: {e}")))?;
        let pixels = {
            let data = slice.get_mapped_range();
            bytemuck::pod_collect_to_vec::<u8, u32>(&data)
        };
        slot.readback.unmap();
        Ok(FrameImage { width, height, batch, pixels })
    }
}

impl std::fmt::Debug for GpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBackend")
            .field("context", &self.ctx)
            .field("frames_in_flight", &self.ring.len())
            .field("batch", &self.batch)
            .finish()
    }
}

