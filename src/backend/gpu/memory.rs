//! Device heap: one storage buffer sub-allocated into aligned ranges.
//!
//! Word addresses inside the heap act as device pointers. The first
//! alignment unit is reserved so address 0 can mean "null".

use std::sync::Arc;

use parking_lot::Mutex;

use super::context::GpuContext;
use crate::util::{align_up, Error, Result, SECTION_ALIGN};

/// First-fit allocator over `[0, capacity)` with coalescing free ranges.
///
/// Free ranges are kept sorted by offset and never adjacent.
#[derive(Debug, Clone)]
pub struct RangeAllocator {
    capacity: u64,
    align: u64,
    free: Vec<(u64, u64)>,
}

impl RangeAllocator {
    /// `reserved` bytes at the start are never handed out.
    pub fn new(capacity: u64, align: u64, reserved: u64) -> Self {
        let start = align_up(reserved, align).min(capacity);
        let free = if start < capacity { vec![(start, capacity - start)] } else { Vec::new() };
        Self { capacity, align, free }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Total free bytes (possibly fragmented).
    pub fn available(&self) -> u64 {
        self.free.iter().map(|&(_, len)| len).sum()
    }

    /// Returns the offset and rounded size of a new range.
    pub fn allocate(&mut self, size: u64) -> Result<(u64, u64)> {
        let size = align_up(size.max(1), self.align);
        let Some(pos) = self.free.iter().position(|&(_, len)| len >= size) else {
            return Err(Error::DeviceOutOfMemory { requested: size, available: self.available() });
        };
        let (offset, len) = self.free[pos];
        if len == size {
            self.free.remove(pos);
        } else {
            self.free[pos] = (offset + size, len - size);
        }
        Ok((offset, size))
    }

    /// Return a range obtained from [`RangeAllocator::allocate`].
    pub fn free(&mut self, offset: u64, size: u64) {
        let pos = self.free.partition_point(|&(o, _)| o < offset);
        let merges_prev = pos > 0 && {
            let (po, pl) = self.free[pos - 1];
            po + pl == offset
        };
        let merges_next = pos < self.free.len() && offset + size == self.free[pos].0;
        match (merges_prev, merges_next) {
            (true, true) => {
                let next_len = self.free[pos].1;
                self.free[pos - 1].1 += size + next_len;
                self.free.remove(pos);
            }
            (true, false) => self.free[pos - 1].1 += size,
            (false, true) => {
                self.free[pos].0 = offset;
                self.free[pos].1 += size;
            }
            (false, false) => self.free.insert(pos, (offset, size)),
        }
    }
}

/// The heap buffer plus its allocator.
pub struct DeviceHeap {
    ctx: Arc<GpuContext>,
    buffer: wgpu::Buffer,
    allocator: Mutex<RangeAllocator>,
}

impl std::fmt::Debug for DeviceHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHeap")
            .field("capacity", &self.buffer.size())
            .field("available", &self.available())
            .finish()
    }
}

impl DeviceHeap {
    pub fn new(ctx: Arc<GpuContext>, capacity: u64) -> Result<Arc<Self>> {
        let max = ctx.max_binding();
        if capacity > max {
            return Err(Error::InvalidConfig(format!(
                "heap_bytes {capacity} exceeds the adapter's storage binding limit {max}"
            )));
        }
        let capacity = capacity & !3;
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("rtbatch_heap"),
            size: capacity,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let allocator = RangeAllocator::new(capacity, SECTION_ALIGN, SECTION_ALIGN);
        tracing::debug!(capacity, "device heap created");
        Ok(Arc::new(Self { ctx, buffer, allocator: Mutex::new(allocator) }))
    }

    #[inline]
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    #[inline]
    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    pub fn available(&self) -> u64 {
        self.allocator.lock().available()
    }

    /// Reserve `size` bytes. The range is released when the handle drops.
    pub fn alloc(self: &Arc<Self>, size: u64) -> Result<DeviceAlloc> {
        let (offset, size) = self.allocator.lock().allocate(size)?;
        Ok(DeviceAlloc { heap: Arc::clone(self), offset, size })
    }
}

/// An owned heap range.
pub struct DeviceAlloc {
    heap: Arc<DeviceHeap>,
    offset: u64,
    size: u64,
}

impl std::fmt::Debug for DeviceAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAlloc").field("offset", &self.offset).field("size", &self.size).finish()
    }
}

impl DeviceAlloc {
    /// Byte offset in the heap buffer.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Word address of byte `rel` inside this allocation.
    #[inline]
    pub fn addr(&self, rel: u64) -> u32 {
        ((self.offset + rel) / 4) as u32
    }

    #[inline]
    pub fn heap(&self) -> &Arc<DeviceHeap> {
        &self.heap
    }
}

impl Drop for DeviceAlloc {
    fn drop(&mut self) {
        self.heap.allocator.lock().free(self.offset, self.size);
    }
}
