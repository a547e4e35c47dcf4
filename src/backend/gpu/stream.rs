//! Ordered command streams over the shared queue.

use std::sync::Arc;

use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::memory::DeviceAlloc;
use crate::util::{Error, Result};

/// A lazily opened encoder plus the staging buffers its copies read from.
///
/// Work recorded on one stream executes in recording order. Staging
/// buffers stay alive until [`CommandStream::synchronize`] has observed
/// the device finishing them.
pub struct CommandStream {
    ctx: Arc<GpuContext>,
    label: &'static str,
    encoder: Option<wgpu::CommandEncoder>,
    staging: Vec<wgpu::Buffer>,
    in_flight: Vec<wgpu::Buffer>,
    submissions: u64,
}

impl std::fmt::Debug for CommandStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandStream")
            .field("label", &self.label)
            .field("recording", &self.encoder.is_some())
            .field("submissions", &self.submissions)
            .finish()
    }
}

impl CommandStream {
    pub fn new(ctx: Arc<GpuContext>, label: &'static str) -> Self {
        Self { ctx, label, encoder: None, staging: Vec::new(), in_flight: Vec::new(), submissions: 0 }
    }

    /// Encoder for recording; opened on first use.
    pub fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let ctx = &self.ctx;
        let label = self.label;
        self.encoder.get_or_insert_with(|| {
            ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
        })
    }

    /// Copy `data` into `dst` at byte `offset` (relative to the allocation).
    pub fn upload(&mut self, dst: &DeviceAlloc, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = (data.len() as u64 + 3) & !3;
        if offset % 4 != 0 || offset + len > dst.size() {
            return Err(Error::device(format!(
                "upload of {len} bytes at {offset} overruns a {} byte allocation",
                dst.size()
            )));
        }
        let mut padded;
        let contents = if len as usize == data.len() {
            data
        } else {
            padded = data.to_vec();
            padded.resize(len as usize, 0);
            &padded[..]
        };
        let staging = self.ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("rtbatch_staging"),
            contents,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        self.encoder()
            .copy_buffer_to_buffer(&staging, 0, dst.heap().buffer(), dst.offset() + offset, len);
        self.staging.push(staging);
        Ok(())
    }

    /// Upload a slice of words.
    #[inline]
    pub fn upload_words(&mut self, dst: &DeviceAlloc, offset: u64, words: &[u32]) -> Result<()> {
        self.upload(dst, offset, bytemuck::cast_slice(words))
    }

    /// Submit recorded work without waiting.
    pub fn submit(&mut self) {
        let Some(encoder) = self.encoder.take() else {
            return;
        };
        self.ctx.queue.submit(Some(encoder.finish()));
        self.submissions += 1;
        tracing::debug!(stream = self.label, submission = self.submissions, staged = self.staging.len(), "stream submitted");
        self.in_flight.append(&mut self.staging);
    }

    /// Submit recorded work and block until the device has finished it.
    pub fn synchronize(&mut self) -> Result<()> {
        self.submit();
        self.ctx.wait_idle()?;
        self.in_flight.clear();
        Ok(())
    }

    #[inline]
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }
}
