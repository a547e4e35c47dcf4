//! wgpu device context.

use std::sync::Arc;

use crate::util::{Error, Result};

/// Adapter, device and queue shared by everything a GPU backend creates.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}

impl GpuContext {
    /// Open the `device_id`-th enumerated adapter.
    #[tracing::instrument]
    pub fn new(device_id: u32) -> Result<Arc<Self>> {
        let instance = wgpu::Instance::default();
        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let adapter = if adapters.is_empty() {
            // Some platforms only expose adapters through request_adapter.
            if device_id != 0 {
                return Err(Error::NoAdapter(device_id));
            }
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            }))
            .map_err(|_| Error::NoAdapter(device_id))?
        } else if (device_id as usize) < adapters.len() {
            adapters.swap_remove(device_id as usize)
        } else {
            return Err(Error::NoAdapter(device_id));
        };

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("rtbatch_device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| Error::RequestDevice(e.to_string()))?;

        device.on_uncaptured_error(Arc::new(|err: wgpu::Error| {
            tracing::error!(%err, "uncaptured device error");
        }));

        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            max_storage_binding = limits.max_storage_buffer_binding_size,
            "GPU context created"
        );
        Ok(Arc::new(Self { device, queue, adapter_info, limits }))
    }

    /// Largest buffer that can be bound as one storage binding.
    #[inline]
    pub fn max_binding(&self) -> u64 {
        (self.limits.max_storage_buffer_binding_size as u64).min(self.limits.max_buffer_size)
    }

    /// Block until all submitted work has completed.
    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| Error::Device(e.to_string()))
    }
}
