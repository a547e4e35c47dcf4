//! Ring of per-frame launch resources.

use super::context::GpuContext;
use super::memory::DeviceHeap;
use super::pack::{GpuEnvParams, GpuFrameInfo};
use crate::util::{Error, Result};

/// Ownership of a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Host may write the parameter block.
    HostWritable,
    /// Submitted; the device reads the parameter block.
    DeviceOwned,
}

/// Launch resources for one in-flight frame.
pub struct FrameSlot {
    pub params: wgpu::Buffer,
    pub info: wgpu::Buffer,
    pub output: wgpu::Buffer,
    pub readback: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub state: SlotState,
}

/// `F` rotating slots; the frame counter advances mod `F`.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
    last: Option<usize>,
    output_bytes: u64,
}

impl FrameRing {
    pub fn new(
        ctx: &GpuContext,
        heap: &DeviceHeap,
        layout: &wgpu::BindGroupLayout,
        frames: usize,
        batch: u32,
        pixels: u64,
    ) -> Result<Self> {
        let output_bytes = pixels * 4;
        if output_bytes > ctx.max_binding() {
            return Err(Error::InvalidConfig(format!(
                "output of {output_bytes} bytes exceeds the adapter's storage binding limit {}",
                ctx.max_binding()
            )));
        }
        let params_bytes = batch as u64 * std::mem::size_of::<GpuEnvParams>() as u64;
        let device = &ctx.device;
        let slots = (0..frames)
            .map(|i| {
                let params = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("rtbatch_params"),
                    size: params_bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let info = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("rtbatch_frame_info"),
                    size: std::mem::size_of::<GpuFrameInfo>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let output = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("rtbatch_output"),
                    size: output_bytes,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                });
                let readback = device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("rtbatch_readback"),
                    size: output_bytes,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("rtbatch_frame_bind_group"),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: heap.buffer().as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: params.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: info.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: output.as_entire_binding() },
                    ],
                });
                tracing::trace!(slot = i, "frame slot created");
                FrameSlot { params, info, output, readback, bind_group, state: SlotState::HostWritable }
            })
            .collect();
        Ok(Self { slots, current: 0, last: None, output_bytes })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn output_bytes(&self) -> u64 {
        self.output_bytes
    }

    /// The slot the host writes next.
    pub fn current(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Mark the current slot finished and rotate.
    pub fn advance(&mut self) {
        self.slots[self.current].state = SlotState::HostWritable;
        self.last = Some(self.current);
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Most recently completed slot.
    pub fn last(&self) -> Option<&FrameSlot> {
        self.last.map(|i| &self.slots[i])
    }
}
